//! Inbound message parsing.
//!
//! Wire body: `{"video_id": "...", "bucket": "...", "key": "..."}`. Unknown
//! fields are ignored.

use serde::{Deserialize, Serialize};

use vframe_models::ProcessingMessage;

use crate::error::{QueueError, QueueResult};

/// Message body as it travels on the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl From<&ProcessingMessage> for WireMessage {
    fn from(msg: &ProcessingMessage) -> Self {
        Self {
            video_id: Some(msg.job_id.to_string()),
            bucket: Some(msg.source_bucket.clone()),
            key: Some(msg.source_key.clone()),
        }
    }
}

fn required(value: Option<String>, field: &str) -> QueueResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| QueueError::invalid_message(format!("missing required field `{}`", field)))
}

/// Parse and validate a message body.
pub fn parse_message(body: &str) -> QueueResult<ProcessingMessage> {
    if body.trim().is_empty() {
        return Err(QueueError::invalid_message("message body is empty"));
    }

    let raw: WireMessage = serde_json::from_str(body)
        .map_err(|e| QueueError::invalid_message(format!("invalid JSON: {}", e)))?;

    Ok(ProcessingMessage::new(
        required(raw.video_id, "video_id")?,
        required(raw.bucket, "bucket")?,
        required(raw.key, "key")?,
    ))
}

/// Unwrap a batch that must hold exactly one message.
pub fn single_message<T>(batch: Vec<T>) -> QueueResult<T> {
    let len = batch.len();
    let mut iter = batch.into_iter();
    match (iter.next(), iter.next()) {
        (Some(only), None) => Ok(only),
        _ => Err(QueueError::InvalidBatch(len)),
    }
}
