//! Structured job logging.
//!
//! Every event carries `job_id` and `operation` fields so a single job can
//! be followed through the JSON log stream.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn, Span};
use vframe_models::{JobId, ProcessingStep};

/// Job-scoped logger for one invocation.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    started: Instant,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            started: Instant::now(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// A step begins doing work.
    pub fn log_step(&self, step: ProcessingStep, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            step = %step,
            "{}", message
        );
    }

    /// A step is skipped because its output is already recorded.
    pub fn log_skip(&self, step: ProcessingStep, reason: &str) {
        debug!(
            job_id = %self.job_id,
            operation = %self.operation,
            step = %step,
            "Skipping step: {}", reason
        );
    }

    pub fn log_block(&self, block: u32, total_blocks: u32, frames: u64) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            block = block + 1,
            total_blocks,
            frames,
            "Block processed"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Job completed: {}", message
        );
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span covering the whole invocation.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}
