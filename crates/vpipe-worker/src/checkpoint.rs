//! On-disk task checkpoints.
//!
//! The checkpoint file is rewritten on every state transition under a
//! per-worker mutex: open(trunc|create|rw) → write → fsync → close. On
//! startup the worker scans for `*.json` files and re-enters the
//! pipeline at the stage the last event indicates.

use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use vpipe_models::TaskCheckpoint;

use crate::error::WorkerResult;

/// Serializes checkpoint writes for one worker.
#[derive(Default)]
pub struct CheckpointStore {
    lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a checkpoint durably.
    pub async fn save(&self, checkpoint: &TaskCheckpoint) -> WorkerResult<()> {
        let _guard = self.lock.lock().await;

        let path = checkpoint.task.checkpoint_path();
        let payload = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .read(true)
            .open(&path)
            .await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Scan the worker's temp root for checkpoints left by a crash.
    ///
    /// Layout is `<root>/<job_id>/<job_id>.json`; unreadable files are
    /// skipped with a warning rather than blocking startup.
    pub async fn load_all(worker_path: &Path) -> WorkerResult<Vec<TaskCheckpoint>> {
        let mut checkpoints = Vec::new();

        let mut dirs = match tokio::fs::read_dir(worker_path).await {
            Ok(dirs) => dirs,
            Err(_) => return Ok(checkpoints),
        };

        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }

            let mut files = tokio::fs::read_dir(dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                match tokio::fs::read(&path).await {
                    Ok(bytes) => match serde_json::from_slice::<TaskCheckpoint>(&bytes) {
                        Ok(checkpoint) => checkpoints.push(checkpoint),
                        Err(e) => warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
                    },
                    Err(e) => warn!("Skipping checkpoint {}: {}", path.display(), e),
                }
            }
        }

        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use vpipe_models::{
        EventStatus, JobId, NotificationType, TaskEncode, TaskEvent, WorkTask,
    };

    fn checkpoint_in(root: &Path) -> TaskCheckpoint {
        let job_id = JobId::new();
        let work_dir = root.join(job_id.to_string());
        std::fs::create_dir_all(&work_dir).unwrap();

        let mut task = WorkTask::new(
            TaskEncode {
                job_id,
                download_url: "http://c/download/x".to_string(),
                checksum_url: "http://c/checksum/x".to_string(),
                upload_url: "http://c/upload/x".to_string(),
            },
            work_dir,
        );
        task.event_id = 4;
        task.source_path = Some(PathBuf::from("src.mkv"));

        TaskCheckpoint {
            last_event: TaskEvent {
                job_id,
                event_id: 4,
                worker_name: "w".to_string(),
                event_time: Utc::now(),
                notification_type: NotificationType::Download,
                status: EventStatus::Completed,
                message: String::new(),
            },
            task,
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let root = tempfile::TempDir::new().unwrap();
        let store = CheckpointStore::new();
        let checkpoint = checkpoint_in(root.path());

        store.save(&checkpoint).await.unwrap();

        let loaded = CheckpointStore::load_all(root.path()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task.task.job_id, checkpoint.task.task.job_id);
        assert_eq!(loaded[0].task.event_id, 4);
        assert_eq!(
            loaded[0].last_event.notification_type,
            NotificationType::Download
        );
    }

    #[tokio::test]
    async fn save_overwrites_previous_state() {
        let root = tempfile::TempDir::new().unwrap();
        let store = CheckpointStore::new();
        let mut checkpoint = checkpoint_in(root.path());

        store.save(&checkpoint).await.unwrap();
        checkpoint.task.event_id = 9;
        checkpoint.last_event.event_id = 9;
        store.save(&checkpoint).await.unwrap();

        let loaded = CheckpointStore::load_all(root.path()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task.event_id, 9);
    }

    #[tokio::test]
    async fn missing_root_yields_no_checkpoints() {
        let loaded = CheckpointStore::load_all(Path::new("/nonexistent/vpipe"))
            .await
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn garbage_files_are_skipped() {
        let root = tempfile::TempDir::new().unwrap();
        let dir = root.path().join("some-job");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.json"), b"{not json").unwrap();

        let loaded = CheckpointStore::load_all(root.path()).await.unwrap();
        assert!(loaded.is_empty());
    }
}
