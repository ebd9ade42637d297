//! Worker-local task state and crash-recovery checkpoints.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::JobStatus;
use crate::task::{NotificationType, TaskEncode, TaskEvent};

/// Pipeline stage a resumed task re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Download,
    Encode,
    Upload,
}

/// A [`TaskEncode`] bound to a per-job working directory.
///
/// `source_path` and `target_path` evolve as the task moves through the
/// pipeline; both are persisted so a resumed task finds its files again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkTask {
    pub task: TaskEncode,
    pub work_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<PathBuf>,
    /// Last emitted event ID for this job, monotonic
    #[serde(default)]
    pub event_id: i64,
}

impl WorkTask {
    pub fn new(task: TaskEncode, work_dir: PathBuf) -> Self {
        Self {
            task,
            work_dir,
            source_path: None,
            target_path: None,
            event_id: 0,
        }
    }

    /// Path of the on-disk checkpoint for this task.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.json", self.task.job_id))
    }
}

/// On-disk record rewritten at every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub last_event: TaskEvent,
    pub task: WorkTask,
}

impl TaskCheckpoint {
    /// Where the task re-enters the pipeline after a crash.
    ///
    /// Terminal jobs return `None` and the checkpoint is garbage. A stage
    /// whose `completed` event was persisted but whose successor never
    /// started is re-run from the same stage; every stage is idempotent.
    pub fn resume_stage(&self) -> Option<PipelineStage> {
        match self.last_event.notification_type {
            NotificationType::Job => match self.last_event.job_status() {
                JobStatus::Added => Some(PipelineStage::Download),
                _ => None,
            },
            NotificationType::Download => Some(PipelineStage::Download),
            NotificationType::FfProbe
            | NotificationType::MkvExtract
            | NotificationType::Pgs
            | NotificationType::Ffmpeg => Some(PipelineStage::Encode),
            NotificationType::Upload => Some(PipelineStage::Upload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use crate::task::EventStatus;
    use chrono::Utc;

    fn checkpoint(notification_type: NotificationType, status: EventStatus) -> TaskCheckpoint {
        let job_id = JobId::new();
        let task = WorkTask::new(
            TaskEncode {
                job_id,
                download_url: "http://coordinator/download/x".to_string(),
                checksum_url: "http://coordinator/checksum/x".to_string(),
                upload_url: "http://coordinator/upload/x".to_string(),
            },
            PathBuf::from("/tmp/worker-a").join(job_id.to_string()),
        );
        TaskCheckpoint {
            last_event: TaskEvent {
                job_id,
                event_id: 3,
                worker_name: "a".to_string(),
                event_time: Utc::now(),
                notification_type,
                status,
                message: String::new(),
            },
            task,
        }
    }

    #[test]
    fn resume_stage_follows_last_notification() {
        assert_eq!(
            checkpoint(NotificationType::Job, EventStatus::Progressing).resume_stage(),
            Some(PipelineStage::Download)
        );
        assert_eq!(
            checkpoint(NotificationType::Download, EventStatus::Completed).resume_stage(),
            Some(PipelineStage::Download)
        );
        assert_eq!(
            checkpoint(NotificationType::Ffmpeg, EventStatus::Progressing).resume_stage(),
            Some(PipelineStage::Encode)
        );
        assert_eq!(
            checkpoint(NotificationType::Pgs, EventStatus::Completed).resume_stage(),
            Some(PipelineStage::Encode)
        );
        assert_eq!(
            checkpoint(NotificationType::Upload, EventStatus::Progressing).resume_stage(),
            Some(PipelineStage::Upload)
        );
    }

    #[test]
    fn terminal_checkpoints_do_not_resume() {
        assert_eq!(
            checkpoint(NotificationType::Job, EventStatus::Completed).resume_stage(),
            None
        );
        assert_eq!(
            checkpoint(NotificationType::Job, EventStatus::Failed).resume_stage(),
            None
        );
        assert_eq!(
            checkpoint(NotificationType::Job, EventStatus::Canceled).resume_stage(),
            None
        );
    }

    #[test]
    fn checkpoint_serde_roundtrip_preserves_paths() {
        let mut cp = checkpoint(NotificationType::Download, EventStatus::Completed);
        cp.task.source_path = Some(cp.task.work_dir.join("src.mkv"));
        let json = serde_json::to_string_pretty(&cp).unwrap();
        let decoded: TaskCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.task.source_path, cp.task.source_path);
        assert_eq!(decoded.last_event.event_id, cp.last_event.event_id);
    }
}
