use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;
use which::which;

use crate::error::{RenderError, Result};

/// Located encoding-tool binaries plus the per-invocation timeout bound.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub timeout: Duration,
}

impl FfmpegTool {
    pub fn locate(timeout: Duration) -> Result<Self> {
        let ffmpeg = which("ffmpeg").map_err(|_| RenderError::ToolMissing {
            tool: "ffmpeg".into(),
        })?;
        let ffprobe = which("ffprobe").map_err(|_| RenderError::ToolMissing {
            tool: "ffprobe".into(),
        })?;
        Ok(Self {
            ffmpeg,
            ffprobe,
            timeout,
        })
    }

    pub async fn version(&self) -> Result<String> {
        let stdout = capture(
            &self.ffmpeg,
            "ffmpeg",
            &["-version".to_string()],
            self.timeout,
        )
        .await?;
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Run ffmpeg to completion; a timed-out process is killed and reported
    /// as a strategy-level failure, never a hang.
    pub async fn run(&self, args: &[String]) -> Result<()> {
        debug!("ffmpeg {}", args.join(" "));
        let mut child = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let stderr = child.stderr.take();
        let drain = tokio::spawn(read_pipe(stderr));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                child.start_kill().ok();
                child.wait().await.ok();
                return Err(RenderError::ToolTimeout {
                    tool: "ffmpeg".into(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };
        let stderr_text = drain.await.unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(RenderError::ToolFailed {
                tool: "ffmpeg".into(),
                detail: tail(&stderr_text),
            })
        }
    }

    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let stdout = capture(&self.ffprobe, "ffprobe", &args, self.timeout).await?;
        parse_duration_output(&stdout).ok_or_else(|| RenderError::Probe {
            path: path.to_path_buf(),
            detail: format!("unparseable ffprobe output: {:?}", stdout.trim()),
        })
    }
}

async fn capture(bin: &Path, tool: &str, args: &[String], timeout: Duration) -> Result<String> {
    debug!("{} {}", tool, args.join(" "));
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let out_task = tokio::spawn(read_pipe(child.stdout.take()));
    let err_task = tokio::spawn(read_pipe(child.stderr.take()));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            child.start_kill().ok();
            child.wait().await.ok();
            return Err(RenderError::ToolTimeout {
                tool: tool.to_string(),
                seconds: timeout.as_secs(),
            });
        }
    };
    let stdout_text = out_task.await.unwrap_or_default();
    let stderr_text = err_task.await.unwrap_or_default();
    if status.success() {
        Ok(stdout_text)
    } else {
        Err(RenderError::ToolFailed {
            tool: tool.to_string(),
            detail: tail(&stderr_text),
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_string(&mut buf).await.ok();
    }
    buf
}

pub(crate) fn parse_duration_output(s: &str) -> Option<f64> {
    let v = s.trim().parse::<f64>().ok()?;
    (v.is_finite() && v > 0.0).then_some(v)
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_duration() {
        assert_eq!(parse_duration_output("42.657000\n"), Some(42.657));
    }

    #[test]
    fn rejects_garbage_and_nonpositive() {
        assert_eq!(parse_duration_output("N/A"), None);
        assert_eq!(parse_duration_output(""), None);
        assert_eq!(parse_duration_output("0.0"), None);
        assert_eq!(parse_duration_output("-3.5"), None);
    }

    #[test]
    fn tail_keeps_last_lines_only() {
        let text = (1..=8)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let t = tail(&text);
        assert!(!t.contains("line 1"));
        assert!(t.contains("line 4"));
        assert!(t.contains("line 8"));
    }
}
