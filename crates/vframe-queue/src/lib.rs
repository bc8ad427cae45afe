//! Redis Streams work queue and notification sinks.
//!
//! This crate provides:
//! - Inbound message parsing and batch validation
//! - Consumer-group consumption with redelivery, retry counting and a DLQ
//! - Progress and completion notifiers

pub mod error;
pub mod message;
pub mod notifier;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use message::{parse_message, single_message, WireMessage};
pub use notifier::{CompletionNotifier, ProgressNotifier, RecordingNotifier, StreamNotifier};
pub use queue::{MessageQueue, QueueConfig, QueuedMessage};
