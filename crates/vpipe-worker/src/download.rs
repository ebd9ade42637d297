//! Download stage.

use futures_util::StreamExt;
use reqwest::header;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use vpipe_models::WorkTask;

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::WorkerContext;
use crate::shutdown::{cancelled, sleep_cancellable};

/// 180 × 5s ≈ 15 minutes of fixed-delay retries.
const DOWNLOAD_ATTEMPTS: u32 = 180;
const CHECKSUM_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fetch the source with checksum verification.
///
/// Retries transient failures on a fixed delay; a 404 is terminal (the
/// coordinator no longer knows the job) and cancellation aborts without
/// consuming an attempt.
pub async fn run(ctx: &WorkerContext, task: &mut WorkTask) -> WorkerResult<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_download(ctx, task).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) if attempt >= DOWNLOAD_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(
                    job_id = %task.task.job_id,
                    attempt,
                    "error on downloading job: {}", e
                );
                sleep_cancellable(RETRY_DELAY, &ctx.cancel).await?;
            }
        }
    }
}

async fn try_download(ctx: &WorkerContext, task: &mut WorkTask) -> WorkerResult<()> {
    let response = ctx.http.get(&task.task.download_url).send().await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(WorkerError::JobNotFound);
    }
    if !response.status().is_success() {
        return Err(WorkerError::download(format!(
            "non-200 response in download code {}",
            response.status().as_u16()
        )));
    }

    let declared_length = response
        .content_length()
        .ok_or_else(|| WorkerError::download("missing Content-Length header"))?;

    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WorkerError::download("missing Content-Disposition header"))?;
    let filename = disposition_filename(disposition)
        .ok_or_else(|| WorkerError::download("Content-Disposition without filename"))?;

    let source_path = task
        .work_dir
        .join(local_source_name(&task.task.job_id.to_string(), &filename));

    let mut file = tokio::fs::File::create(&source_path).await?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    let mut cancel = ctx.cancel.clone();
    let mut stream = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancelled(&mut cancel) => return Err(WorkerError::Cancelled),
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    if written != declared_length {
        return Err(WorkerError::download(format!(
            "body length {written} does not match Content-Length {declared_length}"
        )));
    }

    let expected = fetch_checksum(ctx, &task.task.checksum_url).await?;
    let expected = expected.trim().to_lowercase();
    let actual: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    if actual != expected {
        return Err(WorkerError::ChecksumMismatch { expected, actual });
    }

    task.source_path = Some(source_path);
    Ok(())
}

/// Fetch the source checksum from the coordinator.
async fn fetch_checksum(ctx: &WorkerContext, url: &str) -> WorkerResult<String> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_fetch_checksum(ctx, url).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) if attempt >= CHECKSUM_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!("error {} on calculate checksum of downloaded job {}", e, url);
                sleep_cancellable(RETRY_DELAY, &ctx.cancel).await?;
            }
        }
    }
}

async fn try_fetch_checksum(ctx: &WorkerContext, url: &str) -> WorkerResult<String> {
    let response = ctx.http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(WorkerError::download(format!(
            "non-200 response in sha256 code {}",
            response.status().as_u16()
        )));
    }
    Ok(response.text().await?)
}

/// Extract the `filename` parameter from a Content-Disposition header.
fn disposition_filename(disposition: &str) -> Option<String> {
    let start = disposition.find("filename=")? + "filename=".len();
    let value = disposition[start..].trim();
    let value = value.split(';').next()?.trim();
    let value = value.trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Local source name: `<job_id>` plus the original extension.
fn local_source_name(job_id: &str, filename: &str) -> String {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{job_id}.{ext}"),
        None => job_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_extracted_from_disposition() {
        assert_eq!(
            disposition_filename("attachment; filename=\"movie.mkv\""),
            Some("movie.mkv".to_string())
        );
        assert_eq!(
            disposition_filename("attachment; filename=plain.mp4"),
            Some("plain.mp4".to_string())
        );
        assert_eq!(
            disposition_filename("attachment; filename=\"a b.mkv\"; size=3"),
            Some("a b.mkv".to_string())
        );
        assert_eq!(disposition_filename("attachment"), None);
        assert_eq!(disposition_filename("attachment; filename=\"\""), None);
    }

    #[test]
    fn local_name_keeps_the_original_extension() {
        assert_eq!(local_source_name("j1", "movie.mkv"), "j1.mkv");
        assert_eq!(local_source_name("j1", "movie.final.MP4"), "j1.MP4");
        assert_eq!(local_source_name("j1", "noext"), "j1");
    }
}
