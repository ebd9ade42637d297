//! Wire messages exchanged over the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::{JobId, JobStatus};

/// Work item delivered to a worker.
///
/// URLs are resolved against the coordinator's public endpoint at publish
/// time; the worker treats them as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEncode {
    /// Job this task belongs to
    pub job_id: JobId,
    /// Where to fetch the source bytes
    pub download_url: String,
    /// Where to fetch the source SHA-256 (hex, plain text)
    pub checksum_url: String,
    /// Where to POST the encoded artifact
    pub upload_url: String,
}

/// Pipeline step a lifecycle event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationType {
    Job,
    Download,
    FfProbe,
    MkvExtract,
    Pgs,
    Ffmpeg,
    Upload,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationType::Job => "JOB",
            NotificationType::Download => "DOWNLOAD",
            NotificationType::FfProbe => "FFPROBE",
            NotificationType::MkvExtract => "MKVEXTRACT",
            NotificationType::Pgs => "PGS",
            NotificationType::Ffmpeg => "FFMPEG",
            NotificationType::Upload => "UPLOAD",
        };
        f.write_str(s)
    }
}

/// Outcome carried by a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Progressing,
    Completed,
    Failed,
    Canceled,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventStatus::Started => "started",
            EventStatus::Progressing => "progressing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Lifecycle notification emitted by a worker.
///
/// `event_id` is assigned by the worker at emit time and is strictly
/// increasing per job; the repository discards replays and reorders by
/// comparing against the stored value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub job_id: JobId,
    pub event_id: i64,
    pub worker_name: String,
    pub event_time: DateTime<Utc>,
    pub notification_type: NotificationType,
    pub status: EventStatus,
    #[serde(default)]
    pub message: String,
}

impl TaskEvent {
    /// The persisted job status this event maps to.
    ///
    /// Stage notifications map to their in-flight state regardless of
    /// outcome; a failed stage is always followed by a terminal `JOB`
    /// event, which is the only source of terminal statuses.
    pub fn job_status(&self) -> JobStatus {
        match self.notification_type {
            NotificationType::Job => match self.status {
                EventStatus::Completed => JobStatus::Completed,
                EventStatus::Failed => JobStatus::Failed,
                EventStatus::Canceled => JobStatus::Canceled,
                EventStatus::Started | EventStatus::Progressing => JobStatus::Added,
            },
            NotificationType::Download => JobStatus::Downloading,
            NotificationType::FfProbe
            | NotificationType::MkvExtract
            | NotificationType::Pgs
            | NotificationType::Ffmpeg => JobStatus::Encoding,
            NotificationType::Upload => JobStatus::Uploading,
        }
    }
}

/// Image-subtitle OCR request, one per PGS track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPgs {
    pub job_id: JobId,
    /// Stream index of the extracted track
    pub pgs_id: u32,
    /// Raw `.sup` bytes
    pub data: Vec<u8>,
    pub language: String,
}

/// OCR reply correlated back to the requesting job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPgsResponse {
    pub job_id: JobId,
    pub pgs_id: u32,
    /// Converted SRT bytes, empty on error
    #[serde(default)]
    pub srt: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(notification_type: NotificationType, status: EventStatus) -> TaskEvent {
        TaskEvent {
            job_id: JobId::new(),
            event_id: 1,
            worker_name: "w1".to_string(),
            event_time: Utc::now(),
            notification_type,
            status,
            message: String::new(),
        }
    }

    #[test]
    fn job_events_drive_terminal_statuses() {
        assert_eq!(
            event(NotificationType::Job, EventStatus::Completed).job_status(),
            JobStatus::Completed
        );
        assert_eq!(
            event(NotificationType::Job, EventStatus::Failed).job_status(),
            JobStatus::Failed
        );
        assert_eq!(
            event(NotificationType::Job, EventStatus::Canceled).job_status(),
            JobStatus::Canceled
        );
        assert_eq!(
            event(NotificationType::Job, EventStatus::Progressing).job_status(),
            JobStatus::Added
        );
    }

    #[test]
    fn stage_events_map_to_in_flight_states() {
        assert_eq!(
            event(NotificationType::Download, EventStatus::Failed).job_status(),
            JobStatus::Downloading
        );
        for nt in [
            NotificationType::FfProbe,
            NotificationType::MkvExtract,
            NotificationType::Pgs,
            NotificationType::Ffmpeg,
        ] {
            assert_eq!(
                event(nt, EventStatus::Progressing).job_status(),
                JobStatus::Encoding
            );
        }
        assert_eq!(
            event(NotificationType::Upload, EventStatus::Completed).job_status(),
            JobStatus::Uploading
        );
    }

    #[test]
    fn notification_wire_names_are_uppercase() {
        let json = serde_json::to_string(&NotificationType::MkvExtract).unwrap();
        assert_eq!(json, "\"MKVEXTRACT\"");
        let json = serde_json::to_string(&NotificationType::FfProbe).unwrap();
        assert_eq!(json, "\"FFPROBE\"");
    }

    #[test]
    fn task_event_serde_roundtrip() {
        let ev = event(NotificationType::Ffmpeg, EventStatus::Progressing);
        let json = serde_json::to_string(&ev).unwrap();
        let decoded: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.job_id, ev.job_id);
        assert_eq!(decoded.notification_type, ev.notification_type);
        assert_eq!(decoded.status, ev.status);
    }
}
