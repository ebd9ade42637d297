//! Lifecycle event emission.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use vpipe_bus::MessageBus;
use vpipe_models::{EventStatus, NotificationType, TaskCheckpoint, TaskEvent, WorkTask};

use crate::checkpoint::CheckpointStore;
use crate::error::WorkerResult;

/// Emits lifecycle events and keeps the on-disk checkpoint current.
///
/// Every emission bumps the task's monotonic `event_id`, publishes the
/// event and rewrites the checkpoint. The checkpoint is authoritative
/// for resumption, so a failed publish is logged and tolerated (the
/// repository sorts out gaps through the monotonic guard) while a
/// failed checkpoint write is an error.
pub struct EventSender {
    bus: Arc<MessageBus>,
    worker_name: String,
    checkpoints: CheckpointStore,
}

impl EventSender {
    pub fn new(bus: Arc<MessageBus>, worker_name: impl Into<String>) -> Self {
        Self {
            bus,
            worker_name: worker_name.into(),
            checkpoints: CheckpointStore::new(),
        }
    }

    /// Emit one event for `task` and checkpoint the new state.
    pub async fn emit(
        &self,
        task: &mut WorkTask,
        notification_type: NotificationType,
        status: EventStatus,
        message: impl Into<String>,
    ) -> WorkerResult<()> {
        task.event_id += 1;

        let event = TaskEvent {
            job_id: task.task.job_id,
            event_id: task.event_id,
            worker_name: self.worker_name.clone(),
            event_time: Utc::now(),
            notification_type,
            status,
            message: message.into(),
        };

        info!(
            job_id = %event.job_id,
            event_id = event.event_id,
            "{} has been {}: {}",
            event.notification_type,
            event.status,
            event.message
        );

        let stream = self.bus.config().events_stream.clone();
        if let Err(e) = self.bus.publish_json(&stream, &event).await {
            warn!(job_id = %event.job_id, "Failed to publish event: {}", e);
        }

        self.checkpoints
            .save(&TaskCheckpoint {
                last_event: event,
                task: task.clone(),
            })
            .await
    }

    /// Publish an event without touching the checkpoint.
    ///
    /// Used for `JOB:canceled` on shutdown: the coordinator hears about
    /// the cancellation, but the checkpoint keeps the last stage event
    /// so the task resumes there after a restart.
    pub async fn publish_only(
        &self,
        task: &WorkTask,
        notification_type: NotificationType,
        status: EventStatus,
        message: impl Into<String>,
    ) {
        let event = TaskEvent {
            job_id: task.task.job_id,
            event_id: task.event_id + 1,
            worker_name: self.worker_name.clone(),
            event_time: Utc::now(),
            notification_type,
            status,
            message: message.into(),
        };

        let stream = self.bus.config().events_stream.clone();
        if let Err(e) = self.bus.publish_json(&stream, &event).await {
            warn!(job_id = %event.job_id, "Failed to publish event: {}", e);
        }
    }
}
