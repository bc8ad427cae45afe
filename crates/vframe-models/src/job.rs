//! Durable job state and the step/status machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Opaque external identifier of a job (the `video_id` of the inbound message).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum JobStatus {
    /// First seen, nothing durable done yet
    #[default]
    Pending,
    /// An invocation is (or was, if it crashed) working on the job
    Running,
    /// Terminal success
    Completed,
    /// Last invocation failed; the next delivery restarts step tracking
    Failed,
    /// Last invocation was cancelled mid-flight; the next delivery resumes
    Interrupted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Interrupted => "Interrupted",
        }
    }

    /// Whether a new invocation should continue from the recorded step.
    pub fn is_resumable(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Interrupted)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Running" => Ok(JobStatus::Running),
            "Completed" => Ok(JobStatus::Completed),
            "Failed" => Ok(JobStatus::Failed),
            "Interrupted" => Ok(JobStatus::Interrupted),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Processing step of a job.
///
/// Variants are declared in execution order and the derived `Ord` follows
/// that order, so `step > ProcessingStep::Analyzing` means the analysis
/// output is already recorded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
pub enum ProcessingStep {
    #[default]
    Validating,
    Downloading,
    Analyzing,
    Extracting,
    Zipping,
    Done,
}

impl ProcessingStep {
    pub const ALL: [ProcessingStep; 6] = [
        ProcessingStep::Validating,
        ProcessingStep::Downloading,
        ProcessingStep::Analyzing,
        ProcessingStep::Extracting,
        ProcessingStep::Zipping,
        ProcessingStep::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Validating => "Validating",
            ProcessingStep::Downloading => "Downloading",
            ProcessingStep::Analyzing => "Analyzing",
            ProcessingStep::Extracting => "Extracting",
            ProcessingStep::Zipping => "Zipping",
            ProcessingStep::Done => "Done",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProcessingStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown processing step: {}", s))
    }
}

/// Durable state of a job, one record per job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// Primary key
    pub job_id: JobId,

    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Last step entered
    #[serde(default)]
    pub current_step: ProcessingStep,

    /// Cumulative video seconds successfully extracted
    #[serde(default)]
    pub last_processed_second: f64,

    /// Next block to extract (equals the number of finished blocks)
    #[serde(default)]
    pub current_block: u32,

    /// Total block count, 0 until analysis completes
    #[serde(default)]
    pub total_blocks: u32,

    /// Frames uploaded so far
    #[serde(default)]
    pub processed_frames: u64,

    /// Frame count reported by the analyzer (0 = unknown)
    #[serde(default)]
    pub total_frames: u64,

    /// Frame progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Probed duration, recorded so resumed runs size the last block exactly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,

    /// Creation timestamp (set once)
    pub created_at: DateTime<Utc>,

    /// First transition to Running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on Completed only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Updated on every checkpoint
    pub last_heartbeat: DateTime<Utc>,

    /// Bucket of the uploaded archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_bucket: Option<String>,

    /// Object key of the uploaded archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_key: Option<String>,

    /// Free-form annotations
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl JobState {
    /// Create the initial state for a job seen for the first time.
    pub fn new(job_id: impl Into<JobId>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            current_step: ProcessingStep::Validating,
            last_processed_second: 0.0,
            current_block: 0,
            total_blocks: 0,
            processed_frames: 0,
            total_frames: 0,
            progress: 0,
            duration_seconds: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat: now,
            zip_bucket: None,
            zip_key: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Whether every block has been extracted and uploaded.
    pub fn is_extraction_complete(&self) -> bool {
        self.total_blocks > 0 && self.current_block >= self.total_blocks
    }

    /// Whether the analyzer output is already recorded.
    ///
    /// `total_frames` may legitimately be zero when the container reports no
    /// frame count, so a recorded duration or finished extraction also counts.
    pub fn has_analysis(&self) -> bool {
        self.total_blocks > 0
            && (self.current_step > ProcessingStep::Analyzing
                || self.total_frames > 0
                || self.duration_seconds.is_some()
                || self.is_extraction_complete())
    }

    /// Reset step tracking for a fresh (non-resumed) attempt. Counters are kept.
    pub fn reset_for_attempt(&mut self) {
        self.status = JobStatus::Pending;
        self.current_step = ProcessingStep::Validating;
    }

    /// Move the step cursor forward. Never moves it backwards.
    pub fn enter_step(&mut self, step: ProcessingStep) {
        if step > self.current_step {
            self.current_step = step;
        }
    }

    /// Update the heartbeat timestamp.
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Mark the job as running, recording the first start time.
    pub fn mark_running(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = JobStatus::Running;
    }

    /// Record a finished block.
    pub fn record_block(&mut self, block_index: u32, frames_uploaded: u64, block_seconds: f64) {
        self.current_block = block_index + 1;
        self.processed_frames += frames_uploaded;
        self.last_processed_second += block_seconds;
        self.touch();

        if self.total_frames > 0 {
            let pct = (self.processed_frames as f64 / self.total_frames as f64 * 100.0).round();
            self.progress = pct.clamp(0.0, 100.0) as u8;
        }
    }

    /// Block-level progress percentage used for notifications.
    pub fn block_progress_pct(&self) -> u8 {
        if self.total_blocks == 0 {
            return 0;
        }
        let pct = (self.current_block as f64 / self.total_blocks as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }

    /// Record where the archive was uploaded.
    pub fn set_zip_location(&mut self, bucket: impl Into<String>, key: impl Into<String>) {
        self.zip_bucket = Some(bucket.into());
        self.zip_key = Some(key.into());
    }

    /// Mark the job as completed.
    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.current_step = ProcessingStep::Done;
        self.completed_at = Some(now);
        self.last_heartbeat = now;
    }

    /// Mark the job as failed.
    pub fn mark_failed(&mut self) {
        self.status = JobStatus::Failed;
        self.touch();
    }

    /// Mark the job as interrupted (cancelled before finishing).
    pub fn mark_interrupted(&mut self) {
        self.status = JobStatus::Interrupted;
        self.touch();
    }
}
