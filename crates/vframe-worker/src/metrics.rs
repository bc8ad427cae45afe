//! Worker metrics.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Serve Prometheus metrics on `addr`. Must run inside the Tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config(format!("Failed to install metrics exporter: {}", e)))
}

pub mod names {
    /// Finished invocations by outcome.
    pub const JOBS_TOTAL: &str = "vframe_jobs_total";

    /// Blocks extracted and uploaded.
    pub const BLOCKS_EXTRACTED_TOTAL: &str = "vframe_blocks_extracted_total";

    /// Frames uploaded to blob storage.
    pub const FRAMES_UPLOADED_TOTAL: &str = "vframe_frames_uploaded_total";

    /// Wall time of one invocation.
    pub const JOB_DURATION_SECONDS: &str = "vframe_job_duration_seconds";
}

/// Outcome label values.
pub mod outcome {
    pub const COMPLETED: &str = "completed";
    pub const ALREADY_COMPLETED: &str = "already_completed";
    pub const FAILED: &str = "failed";
    pub const INTERRUPTED: &str = "interrupted";
    pub const INVALID_MESSAGE: &str = "invalid_message";
}

pub fn record_job(outcome: &'static str, elapsed: Duration) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn record_block(frames: u64) {
    counter!(names::BLOCKS_EXTRACTED_TOTAL).increment(1);
    counter!(names::FRAMES_UPLOADED_TOTAL).increment(frames);
}
