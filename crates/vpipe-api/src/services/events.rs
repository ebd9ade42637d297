//! Worker event ingest.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use vpipe_bus::MessageBus;
use vpipe_models::TaskEvent;
use vpipe_repo::JobRepository;

/// Consumes the events stream and reconciles worker reports with
/// persisted job state.
///
/// Delivery is at-least-once; the repository's monotonic `event_id`
/// guard makes replays harmless. A message is only acked once the
/// repository accepted it, so a database outage leaves events pending
/// for redelivery. Malformed payloads are acked away as poison.
pub struct EventIngest {
    repo: Arc<JobRepository>,
    bus: Arc<MessageBus>,
    shutdown: watch::Receiver<bool>,
    consumer_name: String,
}

impl EventIngest {
    pub fn new(
        repo: Arc<JobRepository>,
        bus: Arc<MessageBus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            repo,
            bus,
            shutdown,
            consumer_name: format!("server-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Run the consume loop until shutdown.
    pub async fn run(self) {
        info!(consumer = %self.consumer_name, "Starting event ingest");

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Event ingest stopping");
                        return;
                    }
                }
                result = self.consume_batch() => {
                    if let Err(e) = result {
                        error!("Event consume failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    async fn consume_batch(&self) -> Result<(), vpipe_bus::BusError> {
        let stream = self.bus.config().events_stream.clone();
        let group = self.bus.config().events_group.clone();

        // Events unacked by a previous coordinator run stay pending
        // under its dead consumer name; take them over.
        let mut messages = self
            .bus
            .claim_pending(&stream, &group, &self.consumer_name, 60_000, 20)
            .await
            .unwrap_or_default();

        messages.extend(
            self.bus
                .consume(&stream, &group, &self.consumer_name, 1000, 20)
                .await?,
        );

        for (message_id, payload) in messages {
            match serde_json::from_slice::<TaskEvent>(&payload) {
                Ok(event) => match self.repo.apply_event(&event).await {
                    Ok(applied) => {
                        if applied {
                            debug!(
                                job_id = %event.job_id,
                                event_id = event.event_id,
                                notification = %event.notification_type,
                                status = %event.status,
                                "Applied event"
                            );
                        }
                        self.bus.ack(&stream, &group, &message_id).await?;
                    }
                    Err(e) => {
                        // Leave pending; redelivered once the store recovers.
                        error!(job_id = %event.job_id, "Failed to apply event: {}", e);
                    }
                },
                Err(e) => {
                    warn!(%message_id, "Dropping malformed event: {}", e);
                    self.bus.ack(&stream, &group, &message_id).await?;
                }
            }
        }

        Ok(())
    }
}
