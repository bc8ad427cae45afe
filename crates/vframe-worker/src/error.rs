//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] vframe_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] vframe_storage::StorageError),

    #[error("Job store error: {0}")]
    JobStore(#[from] vframe_jobstore::JobStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vframe_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment(msg.into())
    }

    /// Whether the job stopped because its cancellation signal fired.
    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Cancelled => true,
            WorkerError::Media(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the inbound message itself is unusable. Redelivery cannot help.
    pub fn is_invalid_message(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_poison())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vframe_media::MediaError;
    use vframe_queue::QueueError;

    #[test]
    fn test_cancellation_detection() {
        assert!(WorkerError::Cancelled.is_cancelled());
        assert!(WorkerError::from(MediaError::Cancelled).is_cancelled());
        assert!(!WorkerError::from(MediaError::Timeout(5)).is_cancelled());
        assert!(!WorkerError::config("x").is_cancelled());
    }

    #[test]
    fn test_invalid_message_detection() {
        assert!(WorkerError::from(QueueError::invalid_message("blank key")).is_invalid_message());
        assert!(WorkerError::from(QueueError::InvalidBatch(2)).is_invalid_message());
        assert!(!WorkerError::from(QueueError::publish_failed("down")).is_invalid_message());
        assert!(!WorkerError::Cancelled.is_invalid_message());
    }
}
