//! Progress and completion notifiers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use vframe_models::{CompletionNotification, ProgressNotification};

use crate::error::{QueueError, QueueResult};
use crate::queue::BODY_FIELD;

/// Receives a notification after every finished block.
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn notify_progress(&self, notification: &ProgressNotification) -> QueueResult<()>;
}

/// Receives a notification once a job completes.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify_completion(&self, notification: &CompletionNotification) -> QueueResult<()>;
}

/// Publishes notifications as JSON bodies on a Redis stream.
pub struct StreamNotifier {
    client: redis::Client,
    target: String,
}

impl StreamNotifier {
    pub fn new(redis_url: &str, target: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            target: target.into(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn publish(&self, payload: String) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let id: String = redis::cmd("XADD")
            .arg(&self.target)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        debug!("Published notification {} to {}", id, self.target);
        Ok(id)
    }
}

#[async_trait]
impl ProgressNotifier for StreamNotifier {
    async fn notify_progress(&self, notification: &ProgressNotification) -> QueueResult<()> {
        self.publish(serde_json::to_string(notification)?).await?;
        Ok(())
    }
}

#[async_trait]
impl CompletionNotifier for StreamNotifier {
    async fn notify_completion(&self, notification: &CompletionNotification) -> QueueResult<()> {
        self.publish(serde_json::to_string(notification)?).await?;
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    progress: Mutex<Vec<ProgressNotification>>,
    completions: Mutex<Vec<CompletionNotification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent notification fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn progress(&self) -> Vec<ProgressNotification> {
        self.progress.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn completions(&self) -> Vec<CompletionNotification> {
        self.completions
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn check(&self) -> QueueResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(QueueError::publish_failed("notification sink unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProgressNotifier for RecordingNotifier {
    async fn notify_progress(&self, notification: &ProgressNotification) -> QueueResult<()> {
        self.check()?;
        self.progress
            .lock()
            .map_err(|_| QueueError::publish_failed("lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify_completion(&self, notification: &CompletionNotification) -> QueueResult<()> {
        self.check()?;
        self.completions
            .lock()
            .map_err(|_| QueueError::publish_failed("lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;
    use vframe_models::JobId;

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        let id = JobId::from("vid");

        notifier
            .notify_progress(&ProgressNotification::new(&id, 25, 1, 4))
            .await
            .unwrap();
        notifier
            .notify_completion(&CompletionNotification::new(&id, "zips", "vid/vid.zip"))
            .await
            .unwrap();

        assert_eq!(notifier.progress().len(), 1);
        assert_eq!(notifier.completions()[0].zip.key, "vid/vid.zip");

        notifier.set_fail(true);
        assert_err!(
            notifier
                .notify_progress(&ProgressNotification::new(&id, 50, 2, 4))
                .await
        );
        assert_eq!(notifier.progress().len(), 1);
    }

    #[test]
    fn test_stream_notifier_target() {
        let notifier = StreamNotifier::new("redis://localhost:6379", "vframe:progress").unwrap();
        assert_eq!(notifier.target(), "vframe:progress");
    }
}
