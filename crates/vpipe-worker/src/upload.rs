//! Upload stage.

use reqwest::header;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::warn;

use vpipe_models::WorkTask;

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::WorkerContext;
use crate::shutdown::{cancelled, sleep_cancellable};

/// 17,280 × 5s ≈ 24 hours of fixed-delay retries.
const UPLOAD_ATTEMPTS: u32 = 17_280;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Stream the encoded artifact back to the coordinator.
///
/// The file is hashed with a full scan first, then streamed in a POST
/// carrying the `checksum` header; the coordinator must answer 201.
pub async fn run(ctx: &WorkerContext, task: &mut WorkTask) -> WorkerResult<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_upload(ctx, task).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) if attempt >= UPLOAD_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(
                    job_id = %task.task.job_id,
                    attempt,
                    "error on uploading job: {}", e
                );
                sleep_cancellable(RETRY_DELAY, &ctx.cancel).await?;
            }
        }
    }
}

async fn try_upload(ctx: &WorkerContext, task: &WorkTask) -> WorkerResult<()> {
    let target = task
        .target_path
        .as_ref()
        .ok_or_else(|| WorkerError::upload("task has no target file"))?;

    let size = tokio::fs::metadata(target).await?.len();
    let checksum = hash_file(target).await?;

    let file = tokio::fs::File::open(target).await?;
    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

    let request = ctx
        .http
        .post(&task.task.upload_url)
        .header("checksum", &checksum)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .body(body);

    let mut cancel = ctx.cancel.clone();
    let response = tokio::select! {
        response = request.send() => response?,
        _ = cancelled(&mut cancel) => return Err(WorkerError::Cancelled),
    };

    if response.status() != StatusCode::CREATED {
        return Err(WorkerError::upload(format!(
            "invalid status code {}",
            response.status().as_u16()
        )));
    }

    Ok(())
}

/// Hex SHA-256 of a file, streamed in chunks.
async fn hash_file(path: &Path) -> WorkerResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streamed_hash_matches_one_shot_digest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("artifact.mkv");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let expected: String = Sha256::digest(b"hello world")
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(hash_file(&path).await.unwrap(), expected);
    }
}
