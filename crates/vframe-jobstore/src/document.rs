//! Persistence mapping for `JobState`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vframe_models::{JobId, JobState, JobStatus, ProcessingStep};

use crate::error::{JobStoreError, JobStoreResult};

/// Stored shape of a job: `_id` key, enum names as strings, RFC3339 timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobStateDocument {
    #[serde(rename = "_id")]
    pub job_id: String,
    pub status: String,
    pub current_step: String,
    #[serde(default)]
    pub last_processed_second: f64,
    #[serde(default)]
    pub current_block: u32,
    #[serde(default)]
    pub total_blocks: u32,
    #[serde(default)]
    pub processed_frames: u64,
    #[serde(default)]
    pub total_frames: u64,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_key: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl From<&JobState> for JobStateDocument {
    fn from(state: &JobState) -> Self {
        Self {
            job_id: state.job_id.to_string(),
            status: state.status.as_str().to_string(),
            current_step: state.current_step.as_str().to_string(),
            last_processed_second: state.last_processed_second,
            current_block: state.current_block,
            total_blocks: state.total_blocks,
            processed_frames: state.processed_frames,
            total_frames: state.total_frames,
            progress: state.progress,
            duration_seconds: state.duration_seconds,
            created_at: state.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            last_heartbeat: state.last_heartbeat,
            zip_bucket: state.zip_bucket.clone(),
            zip_key: state.zip_key.clone(),
            metadata: state.metadata.clone(),
        }
    }
}

impl TryFrom<JobStateDocument> for JobState {
    type Error = JobStoreError;

    fn try_from(doc: JobStateDocument) -> Result<Self, Self::Error> {
        let status: JobStatus = doc.status.parse().map_err(JobStoreError::invalid_document)?;
        let current_step: ProcessingStep = doc
            .current_step
            .parse()
            .map_err(JobStoreError::invalid_document)?;

        Ok(JobState {
            job_id: JobId::from(doc.job_id),
            status,
            current_step,
            last_processed_second: doc.last_processed_second,
            current_block: doc.current_block,
            total_blocks: doc.total_blocks,
            processed_frames: doc.processed_frames,
            total_frames: doc.total_frames,
            progress: doc.progress,
            duration_seconds: doc.duration_seconds,
            created_at: doc.created_at,
            started_at: doc.started_at,
            completed_at: doc.completed_at,
            last_heartbeat: doc.last_heartbeat,
            zip_bucket: doc.zip_bucket,
            zip_key: doc.zip_key,
            metadata: doc.metadata,
        })
    }
}

impl JobStateDocument {
    /// Decode a raw document returned by the store.
    pub fn from_value(value: Value) -> JobStoreResult<Self> {
        serde_json::from_value(value).map_err(|e| JobStoreError::invalid_document(e.to_string()))
    }

    /// Encode for the store.
    pub fn to_value(&self) -> JobStoreResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
