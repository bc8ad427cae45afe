//! Outbound notification payloads.
//!
//! Field names are part of the wire contract with downstream consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Status string carried by notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Running,
    Completed,
}

/// Emitted after each successfully processed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressNotification {
    pub video_id: String,
    pub status: NotificationStatus,
    pub progress: u8,
    pub current_block: u32,
    pub total_blocks: u32,
    pub timestamp: DateTime<Utc>,
}

impl ProgressNotification {
    pub fn new(job_id: &JobId, progress: u8, current_block: u32, total_blocks: u32) -> Self {
        Self {
            video_id: job_id.to_string(),
            status: NotificationStatus::Running,
            progress: progress.min(100),
            current_block,
            total_blocks,
            timestamp: Utc::now(),
        }
    }
}

/// Location of the uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipLocation {
    pub bucket: String,
    pub key: String,
}

/// Emitted once a job reaches Completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotification {
    pub video_id: String,
    pub status: NotificationStatus,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    pub zip: ZipLocation,
}

impl CompletionNotification {
    pub fn new(job_id: &JobId, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            video_id: job_id.to_string(),
            status: NotificationStatus::Completed,
            progress: 100,
            timestamp: Utc::now(),
            zip: ZipLocation {
                bucket: bucket.into(),
                key: key.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_payload_shape() {
        let n = ProgressNotification::new(&JobId::from("vid"), 50, 2, 4);
        let json = serde_json::to_value(&n).unwrap();

        assert_eq!(json["video_id"], "vid");
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["progress"], 50);
        assert_eq!(json["current_block"], 2);
        assert_eq!(json["total_blocks"], 4);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_completion_payload_shape() {
        let n = CompletionNotification::new(&JobId::from("vid"), "zips", "vid/vid.zip");
        let json = serde_json::to_value(&n).unwrap();

        assert_eq!(json["video_id"], "vid");
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["progress"], 100);
        assert_eq!(json["zip"]["bucket"], "zips");
        assert_eq!(json["zip"]["key"], "vid/vid.zip");
    }

    #[test]
    fn test_progress_is_clamped() {
        let n = ProgressNotification::new(&JobId::from("vid"), 250, 1, 1);
        assert_eq!(n.progress, 100);
    }
}
