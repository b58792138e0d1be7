use std::path::Path;

use hound::WavReader;
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::ffmpeg::FfmpegTool;

/// Narration duration, read once at render start. WAV files are decoded
/// locally; everything else goes through an ffprobe boundary call.
pub async fn narration_duration_seconds(tool: &FfmpegTool, path: &Path) -> Result<f64> {
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
    {
        match wav_duration_seconds(path) {
            Ok(duration) => return Ok(duration),
            Err(e) => debug!("WAV fast path failed for {}: {e}", path.display()),
        }
    }
    tool.probe_duration(path).await
}

pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path).map_err(|e| RenderError::Probe {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    Ok(frames / spec.sample_rate as f64)
}
