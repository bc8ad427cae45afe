//! Shared data models for the VFrame extraction worker.
//!
//! This crate provides Serde-serializable types for:
//! - Inbound processing messages
//! - Durable job state and its step/status machine
//! - Video metadata produced by the analyzer
//! - Block arithmetic and object key layout
//! - Outbound progress and completion notifications

pub mod blocks;
pub mod job;
pub mod keys;
pub mod message;
pub mod notification;
pub mod video;

// Re-export common types
pub use blocks::{block_duration, total_blocks_for, BlockWindow};
pub use job::{JobId, JobState, JobStatus, ProcessingStep};
pub use message::ProcessingMessage;
pub use notification::{CompletionNotification, NotificationStatus, ProgressNotification, ZipLocation};
pub use video::VideoMetadata;
