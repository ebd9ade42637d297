//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::health;
use crate::handlers::jobs::{cancel_job, get_job, list_jobs, submit_job};
use crate::handlers::transfer::{download_source, source_checksum, upload_encoded};
use crate::state::AppState;

/// Create the coordinator router.
pub fn create_router(state: AppState) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job));

    // Encoded artifacts are whole video files; no body cap applies.
    let transfer_routes = Router::new()
        .route("/download/:job_id", get(download_source))
        .route("/checksum/:job_id", get(source_checksum))
        .route("/upload/:job_id", post(upload_encoded))
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .merge(job_routes)
        .merge(transfer_routes)
        .route("/health", get(health))
        .with_state(state)
}
