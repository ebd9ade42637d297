//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The coordinator no longer knows the job (HTTP 404 on download).
    #[error("job not found")]
    JobNotFound,

    #[error("checksum error on download source:{expected} downloaded:{actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    /// Probe failure or post-encode duration/size regression.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("timeout waiting for PGS conversion")]
    PgsTimeout,

    #[error("PGS conversion failed: {0}")]
    Pgs(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] vpipe_bus::BusError),

    #[error("Media error: {0}")]
    Media(#[from] vpipe_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// A cancellation observed anywhere in the stage.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
            || matches!(self, WorkerError::Media(vpipe_media::MediaError::Cancelled))
    }

    /// Errors that must not be retried by stage retry loops.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerError::JobNotFound) || self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_terminal_but_checksum_is_retryable() {
        assert!(WorkerError::JobNotFound.is_terminal());
        assert!(!WorkerError::ChecksumMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        }
        .is_terminal());
        assert!(!WorkerError::download("boom").is_terminal());
    }

    #[test]
    fn media_cancellation_propagates() {
        let err = WorkerError::from(vpipe_media::MediaError::Cancelled);
        assert!(err.is_cancelled());
        assert!(err.is_terminal());
    }
}
