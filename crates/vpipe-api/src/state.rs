//! Application state.

use std::sync::Arc;

use vpipe_bus::MessageBus;
use vpipe_repo::JobRepository;

use crate::config::ServerConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub repo: Arc<JobRepository>,
    pub bus: Arc<MessageBus>,
}

impl AppState {
    pub fn new(config: ServerConfig, repo: JobRepository, bus: MessageBus) -> Self {
        Self {
            config: Arc::new(config),
            repo: Arc::new(repo),
            bus: Arc::new(bus),
        }
    }
}
