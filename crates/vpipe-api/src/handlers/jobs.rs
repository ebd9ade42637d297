//! Job ingest and operator visibility.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vpipe_models::{Job, JobId, JobStatus};

use crate::error::{ApiError, ApiResult};
use crate::handlers::transfer::resolve_under;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub source_path: String,
    pub destination_path: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

/// POST /jobs
///
/// Register a transcoding job. Idempotent on `(source, destination)`:
/// re-submitting an existing pair returns the existing ID, and
/// re-submitting a failed job requeues it (the operator retry path).
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<Json<SubmitJobResponse>> {
    if request.source_path.trim().is_empty() || request.destination_path.trim().is_empty() {
        return Err(ApiError::bad_request(
            "source_path and destination_path are required",
        ));
    }

    let source = resolve_under(&state.config.download_path, &request.source_path)?;
    resolve_under(&state.config.upload_path, &request.destination_path)?;

    if !source.exists() {
        return Err(ApiError::not_found(format!(
            "source not found: {}",
            request.source_path
        )));
    }

    let job_id = state
        .repo
        .add_job(
            &request.source_path,
            &request.destination_path,
            request.priority,
        )
        .await?;

    info!(%job_id, source = %request.source_path, "Job submitted");

    Ok(Json(SubmitJobResponse { job_id }))
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    let job = state.repo.get(job_id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

/// GET /jobs?status=&limit=
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let jobs = state.repo.list(query.status, limit).await?;
    Ok(Json(jobs))
}

/// POST /jobs/:job_id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    // 404s before touching the row
    let job = state.repo.get(job_id).await?;

    if !state.repo.cancel(job_id).await? {
        return Err(ApiError::Conflict(format!(
            "job is already {}",
            job.status
        )));
    }

    info!(%job_id, "Job canceled");
    let job = state.repo.get(job_id).await?;
    Ok(Json(job))
}
