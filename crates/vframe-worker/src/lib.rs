//! Resumable video-to-frames extraction worker.
//!
//! This crate provides:
//! - Worker configuration and startup environment validation
//! - The block-wise workflow engine with checkpointed resumption
//! - The queue consumer loop with retry and dead-letter handling
//! - Job-scoped logging, metrics and cancellation

pub mod cancel;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod workflow;
pub mod workspace;

pub use config::WorkerConfig;
pub use env::{validate_environment, ResolvedBinaries};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use workflow::{ExecutionOutcome, WorkflowContext, WorkflowEngine, WorkflowSettings};
pub use workspace::JobWorkspace;
