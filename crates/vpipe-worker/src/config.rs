//! Worker configuration.

use chrono::NaiveTime;
use std::path::PathBuf;

/// Daily window outside of which no new work is accepted.
///
/// Configured as `HH:MM` pairs; jobs already in the pipeline keep
/// running past `stop_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    pub start_after: NaiveTime,
    pub stop_after: NaiveTime,
}

impl DailyWindow {
    pub fn parse(start_after: &str, stop_after: &str) -> Option<Self> {
        Some(Self {
            start_after: parse_hhmm(start_after)?,
            stop_after: parse_hhmm(stop_after)?,
        })
    }

    /// Whether `now` lies inside the window.
    pub fn contains(&self, now: NaiveTime) -> bool {
        now > self.start_after && now < self.stop_after
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker name, carried in every emitted event
    pub name: String,
    /// Work accepted but not yet finished encoding
    pub max_prefetch_jobs: u32,
    /// Parallel encode (and upload) tasks
    pub encode_jobs: usize,
    /// Threads handed to the transcoder
    pub threads: u32,
    /// Root under which per-worker directories are created
    pub temporal_path: PathBuf,
    /// When paused, no new work is accepted
    pub paused: bool,
    /// Optional daily acceptance window
    pub window: Option<DailyWindow>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: hostname(),
            max_prefetch_jobs: 1,
            encode_jobs: 1,
            threads: available_threads(),
            temporal_path: std::env::temp_dir().join("vpipe"),
            paused: false,
            window: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let window = match (
            std::env::var("WORKER_START_AFTER").ok(),
            std::env::var("WORKER_STOP_AFTER").ok(),
        ) {
            (Some(start), Some(stop)) => DailyWindow::parse(&start, &stop),
            _ => None,
        };

        Self {
            name: std::env::var("WORKER_NAME").unwrap_or(defaults.name),
            max_prefetch_jobs: std::env::var("WORKER_MAX_PREFETCH_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_prefetch_jobs),
            encode_jobs: std::env::var("WORKER_ENCODE_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.encode_jobs),
            threads: std::env::var("WORKER_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.threads),
            temporal_path: std::env::var("WORKER_TEMPORAL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.temporal_path),
            paused: std::env::var("WORKER_PAUSED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            window,
        }
    }

    /// Per-worker directory under the temp root.
    pub fn worker_path(&self) -> PathBuf {
        self.temporal_path.join(format!("worker-{}", self.name))
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}

fn available_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parses_hhmm() {
        let window = DailyWindow::parse("22:30", "06:00").unwrap();
        assert_eq!(window.start_after, NaiveTime::from_hms_opt(22, 30, 0).unwrap());
        assert_eq!(window.stop_after, NaiveTime::from_hms_opt(6, 0, 0).unwrap());

        assert!(DailyWindow::parse("25:00", "06:00").is_none());
        assert!(DailyWindow::parse("garbage", "06:00").is_none());
    }

    #[test]
    fn window_containment() {
        let window = DailyWindow::parse("08:00", "18:00").unwrap();
        assert!(window.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(7, 59, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(18, 1, 0).unwrap()));
    }

    #[test]
    fn worker_path_embeds_the_name() {
        let config = WorkerConfig {
            name: "rack-3".to_string(),
            ..Default::default()
        };
        assert!(config.worker_path().ends_with("worker-rack-3"));
    }
}
