//! Periodic job dispatch.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use vpipe_bus::MessageBus;
use vpipe_models::{Job, TaskEncode};
use vpipe_repo::JobRepository;

use crate::config::ServerConfig;
use crate::error::ApiResult;

/// Finite-concurrency dispatcher.
///
/// Every tick drains unscheduled and stuck jobs from the repository and
/// publishes them to the work queue. Publishing is synchronous; a job
/// whose publish fails stays `added` and is reselected once
/// `job_timeout` passes without a worker event.
pub struct Scheduler {
    config: Arc<ServerConfig>,
    repo: Arc<JobRepository>,
    bus: Arc<MessageBus>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        config: Arc<ServerConfig>,
        repo: Arc<JobRepository>,
        bus: Arc<MessageBus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            repo,
            bus,
            shutdown,
        }
    }

    /// Run the tick loop until shutdown.
    pub async fn run(self) {
        info!(
            period = ?self.config.schedule_time,
            job_timeout = ?self.config.job_timeout,
            "Starting scheduler"
        );

        let mut ticker = interval(self.config.schedule_time);

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Scheduler tick failed: {}", e);
                    }
                }
            }
        }
    }

    /// One dispatch round.
    async fn tick(&self) -> ApiResult<()> {
        let timeout = ChronoDuration::from_std(self.config.job_timeout)
            .unwrap_or_else(|_| ChronoDuration::hours(2));

        let jobs = self
            .repo
            .select_schedulable(self.config.batch_size, Utc::now(), timeout)
            .await?;

        for job in jobs {
            let task = task_for(&self.config.public_url, &job);
            match self
                .bus
                .publish_json(&self.bus.config().encode_stream, &task)
                .await
            {
                Ok(_) => {
                    info!(job_id = %job.id, priority = job.priority, "Dispatched job");
                }
                Err(e) => {
                    // Stays `added`; reclaimed after job_timeout.
                    warn!(job_id = %job.id, "Publish failed, job will be reclaimed: {}", e);
                }
            }
        }

        Ok(())
    }
}

/// Build the wire task for a job, with URLs rooted at the public endpoint.
fn task_for(public_url: &str, job: &Job) -> TaskEncode {
    TaskEncode {
        job_id: job.id,
        download_url: format!("{public_url}/download/{}", job.id),
        checksum_url: format!("{public_url}/checksum/{}", job.id),
        upload_url: format!("{public_url}/upload/{}", job.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vpipe_models::{JobId, JobStatus};

    fn job() -> Job {
        Job {
            id: JobId::new(),
            source_path: "movies/film.mkv".to_string(),
            destination_path: "encoded/film.mkv".to_string(),
            priority: 0,
            status: JobStatus::Added,
            event_id: 0,
            scheduled_at: None,
            last_event_at: None,
            worker_name: None,
            last_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn task_urls_are_rooted_at_the_public_endpoint() {
        let job = job();
        let task = task_for("http://coordinator:8000", &job);

        assert_eq!(task.job_id, job.id);
        assert_eq!(
            task.download_url,
            format!("http://coordinator:8000/download/{}", job.id)
        );
        assert_eq!(
            task.checksum_url,
            format!("http://coordinator:8000/checksum/{}", job.id)
        );
        assert_eq!(
            task.upload_url,
            format!("http://coordinator:8000/upload/{}", job.id)
        );
    }
}
