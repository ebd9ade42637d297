//! Coordinator: ingest API, transfer endpoints, scheduler and event ingest.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
