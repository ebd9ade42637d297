//! Media error types.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("mkvextract not found in PATH")]
    MkvExtractNotFound,

    #[error("Probe failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("{program} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MediaError {
    pub fn probe_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ProbeFailed {
            message: message.into(),
            stderr,
        }
    }

    pub fn invalid_media(msg: impl Into<String>) -> Self {
        Self::InvalidMedia(msg.into())
    }
}
