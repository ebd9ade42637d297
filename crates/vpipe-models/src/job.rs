//! Persisted job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a transcoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner uuid.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Persisted job state.
///
/// `Completed` and `Canceled` are terminal; a job never leaves them.
/// `worker_name` on [`Job`] is set exactly while the status is one of the
/// active states (`Downloading`, `Encoding`, `Uploading`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be scheduled
    #[default]
    Queued,
    /// Selected by the scheduler and published to the work queue
    Added,
    /// A worker is downloading the source
    Downloading,
    /// A worker is probing/encoding
    Encoding,
    /// A worker is uploading the result
    Uploading,
    /// Finished successfully
    Completed,
    /// Finished with an error; requeued only by operator action
    Failed,
    /// Canceled by an operator or by worker shutdown
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Added => "added",
            JobStatus::Downloading => "downloading",
            JobStatus::Encoding => "encoding",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Terminal states never transition out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Canceled)
    }

    /// States in which a worker owns the job.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Downloading | JobStatus::Encoding | JobStatus::Uploading
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "added" => Ok(JobStatus::Added),
            "downloading" => Ok(JobStatus::Downloading),
            "encoding" => Ok(JobStatus::Encoding),
            "uploading" => Ok(JobStatus::Uploading),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted transcoding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Logical source location on coordinator storage
    pub source_path: String,
    /// Destination location on coordinator storage
    pub destination_path: String,
    /// Higher runs earlier
    pub priority: i32,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Highest applied worker event ID, strictly increasing per job
    pub event_id: i64,
    /// Last time the scheduler published this job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Last time a worker event was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    /// Worker currently holding the job, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    /// Message carried by the last applied event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}
