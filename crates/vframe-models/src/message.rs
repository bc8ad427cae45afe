//! Inbound unit of work.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// One processing request, parsed from a queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingMessage {
    /// Job identifier (the message's `video_id`)
    pub job_id: JobId,
    /// Bucket holding the source video
    pub source_bucket: String,
    /// Object key of the source video
    pub source_key: String,
}

impl ProcessingMessage {
    pub fn new(
        job_id: impl Into<JobId>,
        source_bucket: impl Into<String>,
        source_key: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            source_bucket: source_bucket.into(),
            source_key: source_key.into(),
        }
    }

    /// Extension of the source object (without the dot), if any.
    pub fn source_extension(&self) -> Option<&str> {
        Path::new(&self.source_key)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_extension() {
        let msg = ProcessingMessage::new("vid", "in", "uploads/2024/movie.MP4");
        assert_eq!(msg.source_extension(), Some("MP4"));

        let msg = ProcessingMessage::new("vid", "in", "uploads/raw");
        assert_eq!(msg.source_extension(), None);
    }
}
