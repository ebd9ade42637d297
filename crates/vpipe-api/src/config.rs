//! Coordinator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Public base URL workers resolve transfer URLs against
    pub public_url: String,
    /// Root of the source files served by /download
    pub download_path: PathBuf,
    /// Root the encoded artifacts are written under
    pub upload_path: PathBuf,
    /// Postgres DSN
    pub database_url: String,
    /// Scheduler tick period
    pub schedule_time: Duration,
    /// Silence window after which a dispatched job is reclaimed
    pub job_timeout: Duration,
    /// Max jobs published per tick
    pub batch_size: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_url: "http://localhost:8000".to_string(),
            download_path: PathBuf::from("/var/lib/vpipe/sources"),
            upload_path: PathBuf::from("/var/lib/vpipe/encoded"),
            database_url: "postgres://localhost/vpipe".to_string(),
            schedule_time: Duration::from_secs(5),
            job_timeout: Duration::from_secs(2 * 3600),
            batch_size: 10,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("WEB_HOST").unwrap_or(defaults.host),
            port: std::env::var("WEB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            public_url: std::env::var("WEB_PUBLIC_URL")
                .unwrap_or(defaults.public_url)
                .trim_end_matches('/')
                .to_string(),
            download_path: std::env::var("SCHEDULER_DOWNLOAD_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_path),
            upload_path: std::env::var("SCHEDULER_UPLOAD_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_path),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            schedule_time: Duration::from_secs(
                std::env::var("SCHEDULER_SCHEDULE_TIME_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.schedule_time.as_secs()),
            ),
            job_timeout: Duration::from_secs(
                std::env::var("SCHEDULER_JOB_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.job_timeout.as_secs()),
            ),
            batch_size: std::env::var("SCHEDULER_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
        }
    }
}
