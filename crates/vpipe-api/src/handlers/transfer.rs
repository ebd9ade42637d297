//! Source download, checksum and artifact upload endpoints.

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use vpipe_models::JobId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Resolve a logical job path under a storage root.
///
/// Leading slashes are stripped and parent components rejected, so a
/// job can never read or write outside the configured roots.
pub fn resolve_under(root: &Path, logical: &str) -> ApiResult<PathBuf> {
    let relative = logical.trim_start_matches('/');
    if relative.is_empty() {
        return Err(ApiError::bad_request("empty path"));
    }

    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ApiError::bad_request("path may not contain '..'"));
    }

    Ok(root.join(relative))
}

/// GET /download/:job_id
///
/// Streams the source bytes. `Content-Disposition` carries the original
/// file name; workers name the local copy after its extension.
pub async fn download_source(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<JobId>,
) -> ApiResult<Response> {
    let job = state.repo.get(job_id).await?;
    let path = resolve_under(&state.config.download_path, &job.source_path)?;

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|_| ApiError::not_found(format!("source not found: {}", job.source_path)))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| job_id.to_string());

    let file = tokio::fs::File::open(&path).await?;
    let stream = ReaderStream::new(file);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}

/// GET /checksum/:job_id
///
/// Plain-text hex SHA-256 of the source bytes.
pub async fn source_checksum(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<JobId>,
) -> ApiResult<String> {
    let job = state.repo.get(job_id).await?;
    let path = resolve_under(&state.config.download_path, &job.source_path)?;

    if !path.exists() {
        return Err(ApiError::not_found(format!(
            "source not found: {}",
            job.source_path
        )));
    }

    hash_file(&path).await
}

/// POST /upload/:job_id
///
/// Accepts the streamed encoded artifact. The body is written to a
/// `.part` file while hashing; the `checksum` header must match before
/// the artifact is moved to its destination. Responds 201 on success.
/// Re-uploads after a worker crash overwrite the previous artifact.
pub async fn upload_encoded(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<JobId>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<StatusCode> {
    let job = state.repo.get(job_id).await?;

    let expected_checksum = headers
        .get("checksum")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing checksum header"))?
        .to_lowercase();

    let declared_length: u64 = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::bad_request("missing Content-Length header"))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/octet-stream" {
        return Err(ApiError::bad_request(
            "Content-Type must be application/octet-stream",
        ));
    }

    let destination = resolve_under(&state.config.upload_path, &job.destination_path)?;
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part_path = destination.with_extension("part");
    let mut file = tokio::fs::File::create(&part_path).await?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::bad_request(format!("body read error: {e}")))?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if written != declared_length {
        tokio::fs::remove_file(&part_path).await.ok();
        warn!(%job_id, written, declared_length, "Upload length mismatch");
        return Err(ApiError::bad_request(format!(
            "body length {written} does not match Content-Length {declared_length}"
        )));
    }

    let actual_checksum = hex_digest(hasher);
    if actual_checksum != expected_checksum {
        tokio::fs::remove_file(&part_path).await.ok();
        warn!(%job_id, "Upload checksum mismatch");
        return Err(ApiError::bad_request("checksum mismatch"));
    }

    tokio::fs::rename(&part_path, &destination).await?;
    info!(%job_id, destination = %destination.display(), size = written, "Artifact stored");

    Ok(StatusCode::CREATED)
}

/// Hex SHA-256 of a file, computed in streaming chunks.
async fn hash_file(path: &Path) -> ApiResult<String> {
    use tokio::io::AsyncReadExt;

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

    Ok(hex_digest(hasher))
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_traversal() {
        let root = Path::new("/srv/sources");
        assert!(resolve_under(root, "../etc/passwd").is_err());
        assert!(resolve_under(root, "movies/../../etc/passwd").is_err());
        assert!(resolve_under(root, "").is_err());
        assert!(resolve_under(root, "/").is_err());
    }

    #[test]
    fn resolve_strips_leading_slash() {
        let root = Path::new("/srv/sources");
        assert_eq!(
            resolve_under(root, "/movies/film.mkv").unwrap(),
            PathBuf::from("/srv/sources/movies/film.mkv")
        );
        assert_eq!(
            resolve_under(root, "film.mkv").unwrap(),
            PathBuf::from("/srv/sources/film.mkv")
        );
    }

    #[tokio::test]
    async fn streamed_hash_matches_one_shot_digest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        let expected = hex_digest(hasher);

        assert_eq!(hash_file(&path).await.unwrap(), expected);
    }
}
