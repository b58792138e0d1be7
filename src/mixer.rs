use std::path::{Path, PathBuf};

use tracing::warn;

use crate::compositor::VideoFormat;
use crate::error::Result;
use crate::ffmpeg::FfmpegTool;

const SUBTITLE_STYLE: &str = "FontSize=24,OutlineColour=&H000000&,Outline=2";

#[derive(Debug, Clone)]
pub struct AudioMixSpec {
    pub narration: PathBuf,
    pub music: Option<PathBuf>,
    pub music_volume_db: f64,
    pub narration_volume_db: f64,
    pub fade_in: f64,
    pub fade_out: f64,
}

impl AudioMixSpec {
    /// Absence of the music file is not an error; the mix degrades to
    /// narration-only up front.
    pub fn resolve(
        narration: PathBuf,
        music: PathBuf,
        music_volume_db: f64,
        narration_volume_db: f64,
        fade_in: f64,
        fade_out: f64,
    ) -> Self {
        let music = if music.exists() {
            Some(music)
        } else {
            warn!(
                "background music not found at {}, proceeding without music",
                music.display()
            );
            None
        };
        Self {
            narration,
            music,
            music_volume_db,
            narration_volume_db,
            fade_in,
            fade_out,
        }
    }
}

/// Video input for the mux step: either an already-encoded silent stream or
/// a concat-demuxer manifest that ffmpeg turns into one in the same pass.
#[derive(Debug, Clone, Copy)]
pub enum VideoSource<'a> {
    Stream(&'a Path),
    ConcatManifest(&'a Path, VideoFormat),
}

/// Muxes narration (and optionally looped background music) onto the video.
/// A failing music branch degrades to narration-only output instead of
/// failing the render.
pub async fn mux(
    tool: &FfmpegTool,
    source: VideoSource<'_>,
    spec: &AudioMixSpec,
    narration_duration: f64,
    subtitles: Option<&Path>,
    out_path: &Path,
) -> Result<()> {
    if let Some(music) = spec.music.as_deref() {
        let args = music_mix_args(source, spec, music, narration_duration, subtitles, out_path);
        match tool.run(&args).await {
            Ok(()) => return Ok(()),
            Err(e) => warn!("background music mix failed, falling back to narration only: {e}"),
        }
    }
    let args = narration_only_args(source, spec, subtitles, out_path);
    tool.run(&args).await
}

fn video_input_args(source: VideoSource<'_>) -> Vec<String> {
    match source {
        VideoSource::Stream(path) => vec!["-i".into(), path.to_string_lossy().into_owned()],
        VideoSource::ConcatManifest(path, _) => vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            path.to_string_lossy().into_owned(),
        ],
    }
}

fn video_codec_args(source: VideoSource<'_>, subtitles: Option<&Path>) -> Vec<String> {
    let mut args = Vec::new();
    let mut filters = Vec::new();
    if let VideoSource::ConcatManifest(_, format) = source {
        filters.push(format!(
            "scale={}:force_original_aspect_ratio=increase,crop={},fps={}",
            format.dimensions().replace('x', ":"),
            format.dimensions().replace('x', ":"),
            format.fps
        ));
    }
    if let Some(subs) = subtitles {
        filters.push(format!(
            "subtitles='{}':force_style='{SUBTITLE_STYLE}'",
            escape_filter_path(subs)
        ));
    }
    if filters.is_empty() {
        // Pre-encoded stream passes through untouched.
        args.extend(["-c:v".into(), "copy".into()]);
    } else {
        args.extend(["-vf".into(), filters.join(",")]);
        args.extend(["-c:v".into(), "libx264".into()]);
        args.extend(["-pix_fmt".into(), "yuv420p".into()]);
    }
    args
}

pub fn music_mix_args(
    source: VideoSource<'_>,
    spec: &AudioMixSpec,
    music: &Path,
    narration_duration: f64,
    subtitles: Option<&Path>,
    out_path: &Path,
) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    args.extend(video_input_args(source));
    args.extend(["-i".into(), spec.narration.to_string_lossy().into_owned()]);
    // Loop the track seamlessly, then trim to exact narration length.
    args.extend([
        "-stream_loop".into(),
        "-1".into(),
        "-i".into(),
        music.to_string_lossy().into_owned(),
    ]);
    args.extend([
        "-filter_complex".into(),
        build_audio_graph(spec, narration_duration),
    ]);
    args.extend(["-map".into(), "0:v".into(), "-map".into(), "[aout]".into()]);
    args.extend(video_codec_args(source, subtitles));
    args.extend(["-c:a".into(), "aac".into(), "-shortest".into()]);
    args.push(out_path.to_string_lossy().into_owned());
    args
}

pub fn narration_only_args(
    source: VideoSource<'_>,
    spec: &AudioMixSpec,
    subtitles: Option<&Path>,
    out_path: &Path,
) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    args.extend(video_input_args(source));
    args.extend(["-i".into(), spec.narration.to_string_lossy().into_owned()]);
    args.extend(["-map".into(), "0:v".into(), "-map".into(), "1:a".into()]);
    args.extend(video_codec_args(source, subtitles));
    args.extend(["-c:a".into(), "aac".into(), "-shortest".into()]);
    args.push(out_path.to_string_lossy().into_owned());
    args
}

/// Narration and music keep independent dB gains and are summed without
/// renormalization, so narration stays intelligible at low music volume.
fn build_audio_graph(spec: &AudioMixSpec, narration_duration: f64) -> String {
    let fade_out_start = (narration_duration - spec.fade_out).max(0.0);
    format!(
        "[1:a]volume={:.1}dB[nar];\
         [2:a]atrim=0:{:.3},afade=t=in:st=0:d={:.3},afade=t=out:st={:.3}:d={:.3},volume={:.1}dB[bgm];\
         [nar][bgm]amix=inputs=2:duration=first:normalize=0[aout]",
        spec.narration_volume_db,
        narration_duration,
        spec.fade_in,
        fade_out_start,
        spec.fade_out,
        spec.music_volume_db,
    )
}

fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}
