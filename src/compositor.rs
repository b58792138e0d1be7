use std::path::Path;
use std::process::Stdio;

use image::RgbImage;
use image::imageops::FilterType;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{RenderError, Result};
use crate::ffmpeg::FfmpegTool;
use crate::images::ImageSlot;

#[derive(Debug, Clone, Copy)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoFormat {
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn dimensions(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Frame budget for one slot. Transition frames are taken out of the slot's
/// own budget so the per-slot total is exactly `round(duration * fps)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotFrames {
    pub transition: u32,
    pub steady: u32,
}

impl SlotFrames {
    pub fn total(&self) -> u32 {
        self.transition + self.steady
    }
}

pub fn plan_slot_frames(duration: f64, fps: u32, crossfade: f64, is_first: bool) -> SlotFrames {
    let total = ((duration * fps as f64).round() as u32).max(1);
    if is_first || crossfade <= 0.0 {
        return SlotFrames {
            transition: 0,
            steady: total,
        };
    }
    // Always leave at least one steady frame of the incoming image.
    let transition = ((crossfade * fps as f64).round() as u32).min(total.saturating_sub(1));
    SlotFrames {
        transition,
        steady: total - transition,
    }
}

pub fn blend_rgb(prev: &[u8], current: &[u8], alpha: f64, out: &mut [u8]) {
    let a = alpha.clamp(0.0, 1.0);
    for ((o, p), c) in out.iter_mut().zip(prev).zip(current) {
        *o = (f64::from(*p) * (1.0 - a) + f64::from(*c) * a).round() as u8;
    }
}

fn load_frame(path: &Path, format: VideoFormat) -> Result<RgbImage> {
    let img = image::open(path)?;
    // Centered crop: fill the frame, then trim overflow on the long axis.
    Ok(img
        .resize_to_fill(format.width, format.height, FilterType::Triangle)
        .to_rgb8())
}

pub fn rawvideo_encode_args(format: VideoFormat, out_path: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format.dimensions(),
        "-r".into(),
        format.fps.to_string(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        out_path.to_string_lossy().into_owned(),
    ]
}

/// Streams raw RGB frames into an ffmpeg encoder, producing a silent video
/// stream. Only the previous and current resized images are held in memory.
pub async fn compose(
    tool: &FfmpegTool,
    slots: &[ImageSlot],
    format: VideoFormat,
    crossfade: f64,
    out_path: &Path,
) -> Result<()> {
    let args = rawvideo_encode_args(format, out_path);
    debug!("ffmpeg {}", args.join(" "));
    let mut child = Command::new(&tool.ffmpeg)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RenderError::Composition("could not open encoder stdin".into()))?;

    let mut scratch = vec![0u8; format.frame_bytes()];
    let mut previous: Option<RgbImage> = None;
    let mut frames_written = 0u64;

    for (i, slot) in slots.iter().enumerate() {
        let current = match load_frame(&slot.path, format) {
            Ok(img) => img,
            Err(e) => {
                warn!("skipping unreadable image {}: {e}", slot.path.display());
                continue;
            }
        };
        let frames = plan_slot_frames(slot.display_duration, format.fps, crossfade, previous.is_none());

        if let Some(prev) = previous.as_ref() {
            for f in 0..frames.transition {
                let alpha = f64::from(f) / f64::from(frames.transition);
                blend_rgb(prev.as_raw(), current.as_raw(), alpha, &mut scratch);
                stdin.write_all(&scratch).await?;
            }
        }
        for _ in 0..frames.steady {
            stdin.write_all(current.as_raw()).await?;
        }
        frames_written += u64::from(frames.total());
        debug!(
            "slot {}/{}: {} frames ({} transition)",
            i + 1,
            slots.len(),
            frames.total(),
            frames.transition
        );
        previous = Some(current);
    }
    drop(stdin);

    if frames_written == 0 {
        child.start_kill().ok();
        child.wait().await.ok();
        return Err(RenderError::Composition(
            "no readable images in slot sequence".into(),
        ));
    }

    let status = match tokio::time::timeout(tool.timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            child.start_kill().ok();
            child.wait().await.ok();
            return Err(RenderError::ToolTimeout {
                tool: "ffmpeg".into(),
                seconds: tool.timeout.as_secs(),
            });
        }
    };
    if !status.success() {
        return Err(RenderError::Composition(format!(
            "encoder exited with {status}"
        )));
    }
    Ok(())
}
