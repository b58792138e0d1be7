use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::compositor;
use crate::error::{RenderError, Result, StrategyFailure};
use crate::ffmpeg::FfmpegTool;
use crate::images::ImageSlot;
use crate::mixer::{self, AudioMixSpec, VideoSource};

const MAX_SLIDESHOW_IMAGES: usize = 5;

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub slots: Vec<ImageSlot>,
    pub mix: AudioMixSpec,
    pub narration_duration: f64,
    pub format: compositor::VideoFormat,
    pub crossfade: f64,
    pub subtitles: Option<PathBuf>,
    pub output: PathBuf,
}

pub struct RenderContext<'a> {
    pub tool: &'a FfmpegTool,
    pub request: &'a RenderRequest,
    pub work_dir: &'a Path,
}

#[async_trait]
pub trait RenderStrategy: Send + Sync {
    fn id(&self) -> &'static str;
    async fn attempt(&self, ctx: &RenderContext<'_>) -> Result<PathBuf>;
}

/// Strategy 0: compositor-rendered stream with crossfades, full audio mix
/// and subtitle burn-in.
struct FullCompositor;

#[async_trait]
impl RenderStrategy for FullCompositor {
    fn id(&self) -> &'static str {
        "full-compositor"
    }

    async fn attempt(&self, ctx: &RenderContext<'_>) -> Result<PathBuf> {
        let req = ctx.request;
        let silent = ctx.work_dir.join("silent_stream.mp4");
        compositor::compose(ctx.tool, &req.slots, req.format, req.crossfade, &silent).await?;
        mixer::mux(
            ctx.tool,
            VideoSource::Stream(&silent),
            &req.mix,
            req.narration_duration,
            req.subtitles.as_deref(),
            &req.output,
        )
        .await?;
        Ok(req.output.clone())
    }
}

/// Strategy 1: concat-demuxer manifest in a single encoding pass. No
/// crossfade, but sidesteps codec edge cases in the raw-frame pipe.
struct ConcatManifest;

#[async_trait]
impl RenderStrategy for ConcatManifest {
    fn id(&self) -> &'static str {
        "concat-manifest"
    }

    async fn attempt(&self, ctx: &RenderContext<'_>) -> Result<PathBuf> {
        let req = ctx.request;
        let manifest = ctx.work_dir.join("concat_manifest.txt");
        write_concat_manifest(&manifest, &req.slots)?;
        mixer::mux(
            ctx.tool,
            VideoSource::ConcatManifest(&manifest, req.format),
            &req.mix,
            req.narration_duration,
            req.subtitles.as_deref(),
            &req.output,
        )
        .await?;
        Ok(req.output.clone())
    }
}

/// Strategy 2: deliberately degraded fast path. First few images, equal
/// durations, narration only, cheapest encoder preset.
struct ReducedSlideshow;

#[async_trait]
impl RenderStrategy for ReducedSlideshow {
    fn id(&self) -> &'static str {
        "reduced-slideshow"
    }

    async fn attempt(&self, ctx: &RenderContext<'_>) -> Result<PathBuf> {
        let req = ctx.request;
        let subset: Vec<&ImageSlot> = req.slots.iter().take(MAX_SLIDESHOW_IMAGES).collect();
        let per_image = req.narration_duration / subset.len() as f64;
        let equal_slots: Vec<ImageSlot> = subset
            .iter()
            .map(|slot| ImageSlot {
                path: slot.path.clone(),
                display_duration: per_image,
            })
            .collect();

        let manifest = ctx.work_dir.join("slideshow_manifest.txt");
        write_concat_manifest(&manifest, &equal_slots)?;

        let format = req.format;
        let args = vec![
            "-y".to_string(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            manifest.to_string_lossy().into_owned(),
            "-i".into(),
            req.mix.narration.to_string_lossy().into_owned(),
            "-vf".into(),
            format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},fps={fps}",
                w = format.width,
                h = format.height,
                fps = format.fps
            ),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "ultrafast".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-c:a".into(),
            "aac".into(),
            "-shortest".into(),
            req.output.to_string_lossy().into_owned(),
        ];
        ctx.tool.run(&args).await?;
        Ok(req.output.clone())
    }
}

/// Strategy 3: last resort, one image held for the whole narration.
struct SingleFrame;

#[async_trait]
impl RenderStrategy for SingleFrame {
    fn id(&self) -> &'static str {
        "single-frame"
    }

    async fn attempt(&self, ctx: &RenderContext<'_>) -> Result<PathBuf> {
        let req = ctx.request;
        let first = req
            .slots
            .first()
            .ok_or(RenderError::NoImages)?;
        let format = req.format;
        let args = vec![
            "-y".to_string(),
            "-loop".into(),
            "1".into(),
            "-i".into(),
            first.path.to_string_lossy().into_owned(),
            "-i".into(),
            req.mix.narration.to_string_lossy().into_owned(),
            "-vf".into(),
            format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},fps={fps}",
                w = format.width,
                h = format.height,
                fps = format.fps
            ),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "ultrafast".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-c:a".into(),
            "aac".into(),
            "-shortest".into(),
            req.output.to_string_lossy().into_owned(),
        ];
        ctx.tool.run(&args).await?;
        Ok(req.output.clone())
    }
}

/// Concat-demuxer manifest: one `file`/`duration` pair per image, with the
/// final image repeated so the demuxer honors the last duration.
pub fn write_concat_manifest(path: &Path, slots: &[ImageSlot]) -> Result<()> {
    let mut manifest = String::new();
    for slot in slots {
        let absolute = std::path::absolute(&slot.path)?;
        manifest.push_str(&format!(
            "file '{}'\nduration {:.3}\n",
            absolute.display(),
            slot.display_duration
        ));
    }
    if let Some(last) = slots.last() {
        let absolute = std::path::absolute(&last.path)?;
        manifest.push_str(&format!("file '{}'\n", absolute.display()));
    }
    fs::write(path, manifest)?;
    Ok(())
}

pub fn validate_output(path: &Path) -> Result<()> {
    let meta =
        fs::metadata(path).map_err(|_| RenderError::InvalidOutput(path.to_path_buf()))?;
    if meta.len() == 0 {
        return Err(RenderError::InvalidOutput(path.to_path_buf()));
    }
    Ok(())
}

fn discard_partial(path: &Path) {
    if fs::remove_file(path).is_ok() {
        debug!("removed partial output {}", path.display());
    }
}

pub struct RenderChain<'a> {
    tool: &'a FfmpegTool,
    strategies: Vec<Box<dyn RenderStrategy>>,
    cancel: Arc<AtomicBool>,
}

impl<'a> RenderChain<'a> {
    pub fn new(tool: &'a FfmpegTool) -> Self {
        Self::with_strategies(
            tool,
            vec![
                Box::new(FullCompositor),
                Box::new(ConcatManifest),
                Box::new(ReducedSlideshow),
                Box::new(SingleFrame),
            ],
        )
    }

    fn with_strategies(tool: &'a FfmpegTool, strategies: Vec<Box<dyn RenderStrategy>>) -> Self {
        Self {
            tool,
            strategies,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancellation is honored between strategy attempts, never mid-attempt.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Tries each strategy exactly once in priority order. Intermediates live
    /// in a temp dir removed on every exit path; the output path is only
    /// reported after existence and size validation.
    pub async fn render(&self, request: &RenderRequest) -> Result<PathBuf> {
        if request.slots.is_empty() {
            return Err(RenderError::NoImages);
        }
        let work = TempDir::new()?;
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(RenderError::Cancelled);
            }
            info!("attempting render strategy: {}", strategy.id());
            let ctx = RenderContext {
                tool: self.tool,
                request,
                work_dir: work.path(),
            };
            let outcome = match strategy.attempt(&ctx).await {
                Ok(path) => validate_output(&path).map(|()| path),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(path) => {
                    info!("strategy {} produced {}", strategy.id(), path.display());
                    return Ok(path);
                }
                Err(e) => {
                    warn!("strategy {} failed: {e}", strategy.id());
                    discard_partial(&request.output);
                    failures.push(StrategyFailure {
                        strategy: strategy.id(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Err(RenderError::Exhausted(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::VideoFormat;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    enum Behavior {
        Fail,
        WriteOutput,
        WriteEmptyOutput,
    }

    struct Scripted {
        id: &'static str,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RenderStrategy for Scripted {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn attempt(&self, ctx: &RenderContext<'_>) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Fail => Err(RenderError::ToolFailed {
                    tool: "ffmpeg".into(),
                    detail: "scripted failure".into(),
                }),
                Behavior::WriteOutput => {
                    fs::write(&ctx.request.output, b"video")?;
                    Ok(ctx.request.output.clone())
                }
                Behavior::WriteEmptyOutput => {
                    fs::write(&ctx.request.output, b"")?;
                    Ok(ctx.request.output.clone())
                }
            }
        }
    }

    fn tool() -> FfmpegTool {
        FfmpegTool {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            timeout: Duration::from_secs(600),
        }
    }

    fn request(dir: &Path) -> RenderRequest {
        RenderRequest {
            slots: vec![ImageSlot {
                path: dir.join("horror_000.png"),
                display_duration: 30.0,
            }],
            mix: AudioMixSpec {
                narration: dir.join("narration.mp3"),
                music: None,
                music_volume_db: -18.0,
                narration_volume_db: 0.0,
                fade_in: 2.0,
                fade_out: 2.0,
            },
            narration_duration: 30.0,
            format: VideoFormat {
                width: 1280,
                height: 720,
                fps: 24,
            },
            crossfade: 1.0,
            subtitles: None,
            output: dir.join("out.mp4"),
        }
    }

    fn scripted(
        specs: Vec<(&'static str, Behavior)>,
    ) -> (Vec<Box<dyn RenderStrategy>>, Vec<Arc<AtomicUsize>>) {
        let mut strategies: Vec<Box<dyn RenderStrategy>> = Vec::new();
        let mut counters = Vec::new();
        for (id, behavior) in specs {
            let calls = Arc::new(AtomicUsize::new(0));
            counters.push(Arc::clone(&calls));
            strategies.push(Box::new(Scripted {
                id,
                behavior,
                calls,
            }));
        }
        (strategies, counters)
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool();
        let (strategies, counters) = scripted(vec![
            ("a", Behavior::WriteOutput),
            ("b", Behavior::WriteOutput),
        ]);
        let chain = RenderChain::with_strategies(&tool, strategies);
        let path = chain.render(&request(dir.path())).await.unwrap();
        assert!(path.exists());
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_falls_through_to_next_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool();
        let (strategies, counters) =
            scripted(vec![("a", Behavior::Fail), ("b", Behavior::WriteOutput)]);
        let chain = RenderChain::with_strategies(&tool, strategies);
        let path = chain.render(&request(dir.path())).await.unwrap();
        assert!(path.exists());
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_output_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool();
        let (strategies, _) = scripted(vec![
            ("a", Behavior::WriteEmptyOutput),
            ("b", Behavior::WriteOutput),
        ]);
        let chain = RenderChain::with_strategies(&tool, strategies);
        let path = chain.render(&request(dir.path())).await.unwrap();
        assert!(validate_output(&path).is_ok());
    }

    #[tokio::test]
    async fn exhausted_chain_reports_every_attempt_once() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool();
        let (strategies, counters) = scripted(vec![
            ("a", Behavior::Fail),
            ("b", Behavior::Fail),
            ("c", Behavior::Fail),
        ]);
        let chain = RenderChain::with_strategies(&tool, strategies);
        let err = chain.render(&request(dir.path())).await.unwrap_err();
        match err {
            RenderError::Exhausted(failures) => {
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].strategy, "a");
                assert_eq!(failures[2].strategy, "c");
            }
            other => panic!("expected Exhausted, got {other}"),
        }
        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn cancellation_stops_between_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool();
        let (strategies, counters) = scripted(vec![("a", Behavior::WriteOutput)]);
        let chain = RenderChain::with_strategies(&tool, strategies);
        chain.cancel_flag().store(true, Ordering::SeqCst);
        let err = chain.render(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, RenderError::Cancelled));
        assert_eq!(counters[0].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_slot_sequence_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool();
        let (strategies, _) = scripted(vec![("a", Behavior::WriteOutput)]);
        let chain = RenderChain::with_strategies(&tool, strategies);
        let mut req = request(dir.path());
        req.slots.clear();
        let err = chain.render(&req).await.unwrap_err();
        assert!(matches!(err, RenderError::NoImages));
    }

    #[test]
    fn manifest_pairs_files_with_durations_and_repeats_last() {
        let dir = tempfile::tempdir().unwrap();
        let slots = vec![
            ImageSlot {
                path: dir.path().join("horror_a.png"),
                display_duration: 9.0,
            },
            ImageSlot {
                path: dir.path().join("horror_b.png"),
                display_duration: 9.5,
            },
        ];
        let manifest = dir.path().join("list.txt");
        write_concat_manifest(&manifest, &slots).unwrap();
        let written = fs::read_to_string(&manifest).unwrap();
        assert_eq!(written.matches("duration").count(), 2);
        assert!(written.contains("duration 9.000"));
        assert!(written.contains("duration 9.500"));
        // Last file repeated without a trailing duration.
        assert_eq!(written.matches("horror_b.png").count(), 2);
        assert!(written.trim_end().ends_with("horror_b.png'"));
    }

    #[test]
    fn validation_rejects_missing_and_empty_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        assert!(validate_output(&missing).is_err());
        let empty = dir.path().join("empty.mp4");
        fs::write(&empty, b"").unwrap();
        assert!(validate_output(&empty).is_err());
        let ok = dir.path().join("ok.mp4");
        fs::write(&ok, b"data").unwrap();
        assert!(validate_output(&ok).is_ok());
    }
}
