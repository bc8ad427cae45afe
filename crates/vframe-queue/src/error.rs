//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Expected exactly one message per invocation, got {0}")]
    InvalidBatch(usize),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    /// Whether redelivering the same message can never succeed.
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::InvalidMessage(_) | Self::InvalidBatch(_))
    }
}
