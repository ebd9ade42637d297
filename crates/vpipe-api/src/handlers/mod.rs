//! Request handlers.

pub mod jobs;
pub mod transfer;

use axum::http::StatusCode;

/// Liveness probe.
pub async fn health() -> StatusCode {
    StatusCode::OK
}
