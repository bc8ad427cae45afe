//! Cooperative cancellation built on `tokio::sync::watch`.
//!
//! The worker owns a shutdown channel. Each job gets its own channel that
//! trips when shutdown is requested or when the job deadline passes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use vframe_media::wait_for_cancel;

use crate::error::{WorkerError, WorkerResult};

/// Fail fast when the signal has already fired.
pub fn check_cancelled(cancel: &watch::Receiver<bool>) -> WorkerResult<()> {
    if *cancel.borrow() {
        Err(WorkerError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run `fut` unless the signal fires first. A cancelled future is dropped,
/// which also kills any child process it spawned.
pub async fn race_cancel<F, T, E>(cancel: &watch::Receiver<bool>, fut: F) -> WorkerResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<WorkerError>,
{
    check_cancelled(cancel)?;
    tokio::select! {
        biased;
        _ = wait_for_cancel(Some(cancel.clone())) => Err(WorkerError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

/// Per-job cancellation: trips on shutdown or when the deadline elapses.
pub struct JobCancellation {
    rx: watch::Receiver<bool>,
    timed_out: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl JobCancellation {
    pub fn spawn(shutdown: watch::Receiver<bool>, deadline: Duration) -> Self {
        let (tx, rx) = watch::channel(*shutdown.borrow());
        let timed_out = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&timed_out);

        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_cancel(Some(shutdown)) => {}
                _ = tokio::time::sleep(deadline) => {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            let _ = tx.send(true);
        });

        Self {
            rx,
            timed_out,
            watcher,
        }
    }

    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Whether the job deadline (rather than shutdown) tripped the signal.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

impl Drop for JobCancellation {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
