use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

/// One failed strategy attempt, kept for the aggregated report.
#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} not found on PATH")]
    ToolMissing { tool: String },

    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    #[error("{tool} timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("could not probe duration of {path}: {detail}")]
    Probe { path: PathBuf, detail: String },

    #[error("no images available from any source")]
    NoImages,

    #[error("frame composition failed: {0}")]
    Composition(String),

    #[error("image generation failed: {0}")]
    Generation(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("output file missing or empty: {0}")]
    InvalidOutput(PathBuf),

    #[error("render request cancelled")]
    Cancelled,

    #[error("all rendering strategies failed: {}", summarize(.0))]
    Exhausted(Vec<StrategyFailure>),
}

fn summarize(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.strategy, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
