//! Queue consumer loop.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use vframe_media::wait_for_cancel;
use vframe_queue::{parse_message, single_message, MessageQueue, QueuedMessage};

use crate::cancel::JobCancellation;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::{self, outcome};
use crate::workflow::{ExecutionOutcome, WorkflowEngine, OPERATION};

/// How often pending messages of dead consumers are reclaimed.
const CLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// How long one `receive` call blocks.
const RECEIVE_BLOCK_MS: u64 = 1000;

/// How often a message in progress has its idle time reset. Half the
/// visibility timeout, so other consumers never see it as stale.
pub fn heartbeat_interval(visibility_timeout: Duration) -> Duration {
    (visibility_timeout / 2).max(Duration::from_secs(1))
}

/// What to do with a message once its invocation has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Done with it.
    Ack,
    /// Never retry.
    DeadLetter,
    /// Leave pending and count the delivery.
    Retry,
    /// Leave pending without counting (the worker is shutting down).
    Release,
}

/// Map an invocation result onto the message's fate.
pub fn classify(result: &WorkerResult<ExecutionOutcome>, shutting_down: bool) -> Settlement {
    match result {
        Ok(_) => Settlement::Ack,
        Err(e) if e.is_invalid_message() => Settlement::DeadLetter,
        Err(e) if e.is_cancelled() && shutting_down => Settlement::Release,
        Err(_) => Settlement::Retry,
    }
}

/// Takes one message at a time from the queue and runs it through the engine.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<MessageQueue>,
    engine: Arc<WorkflowEngine>,
    shutdown: watch::Receiver<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: MessageQueue,
        engine: WorkflowEngine,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            queue: Arc::new(queue),
            engine: Arc::new(engine),
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Consume until the shutdown signal fires.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' on stream '{}'",
            self.consumer_name,
            self.queue.config().stream_name
        );

        self.queue.init().await?;

        let mut last_claim: Option<Instant> = None;

        loop {
            if *self.shutdown.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            if last_claim.map_or(true, |at| at.elapsed() >= CLAIM_INTERVAL) {
                self.claim_stale().await;
                last_claim = Some(Instant::now());
            }

            tokio::select! {
                _ = wait_for_cancel(Some(self.shutdown.clone())) => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                received = self.queue.receive(&self.consumer_name, RECEIVE_BLOCK_MS) => {
                    match received {
                        Ok(Some(message)) => self.handle(message).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!("Error receiving from queue: {}", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    async fn claim_stale(&self) {
        match self.queue.claim_stale(&self.consumer_name, 1).await {
            Ok(claimed) if claimed.is_empty() => {}
            Ok(claimed) => match single_message(claimed) {
                Ok(message) => {
                    info!("Claimed stale message {}", message.message_id);
                    self.handle(message).await;
                }
                Err(e) => warn!("Unexpected claim result: {}", e),
            },
            Err(e) => warn!("Failed to claim stale messages: {}", e),
        }
    }

    /// Run one message and settle it.
    async fn handle(&self, message: QueuedMessage) {
        let started = Instant::now();

        let result = match parse_message(&message.body) {
            Ok(job) => {
                let logger = JobLogger::new(&job.job_id, OPERATION);
                let cancellation =
                    JobCancellation::spawn(self.shutdown.clone(), self.config.job_timeout);

                let execution = self
                    .engine
                    .execute(&job, cancellation.receiver())
                    .instrument(logger.create_span());
                let result = self
                    .with_visibility_heartbeat(&message.message_id, execution)
                    .await;

                if cancellation.timed_out() {
                    logger.log_warning(&format!(
                        "Job exceeded its deadline of {}s",
                        self.config.job_timeout.as_secs()
                    ));
                }
                result
            }
            Err(e) => Err(WorkerError::from(e)),
        };

        let shutting_down = *self.shutdown.borrow();
        self.settle(&message, result, shutting_down, started.elapsed())
            .await;
    }

    /// Drive `work` while periodically extending the message's visibility.
    async fn with_visibility_heartbeat<F, T>(&self, message_id: &str, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let period = heartbeat_interval(self.queue.config().visibility_timeout);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(work);

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => {
                    if let Err(e) = self
                        .queue
                        .extend_visibility(&self.consumer_name, message_id)
                        .await
                    {
                        warn!(message_id, "Failed to extend message visibility: {}", e);
                    }
                }
            }
        }
    }

    async fn settle(
        &self,
        message: &QueuedMessage,
        result: WorkerResult<ExecutionOutcome>,
        shutting_down: bool,
        elapsed: Duration,
    ) {
        let message_id = message.message_id.as_str();

        match (classify(&result, shutting_down), result) {
            (Settlement::Ack, Ok(done)) => {
                let label = match done {
                    ExecutionOutcome::Completed => outcome::COMPLETED,
                    ExecutionOutcome::AlreadyCompleted => outcome::ALREADY_COMPLETED,
                };
                metrics::record_job(label, elapsed);
                if let Err(e) = self.queue.ack(message_id).await {
                    error!(message_id, "Failed to ack message: {}", e);
                }
            }
            (Settlement::DeadLetter, Err(e)) => {
                error!(message_id, error = %e, "Rejecting invalid message");
                metrics::record_job(outcome::INVALID_MESSAGE, elapsed);
                if let Err(dlq_err) = self.queue.dead_letter(message, &e.to_string()).await {
                    error!(message_id, "Failed to dead-letter message: {}", dlq_err);
                }
            }
            (Settlement::Release, Err(e)) => {
                warn!(message_id, error = %e, "Job interrupted by shutdown, leaving it pending");
                metrics::record_job(outcome::INTERRUPTED, elapsed);
            }
            (_, Err(e)) => {
                error!(message_id, error = %e, "Job failed");
                let label = if e.is_cancelled() {
                    outcome::INTERRUPTED
                } else {
                    outcome::FAILED
                };
                metrics::record_job(label, elapsed);

                let retries = match self.queue.increment_retry(message_id).await {
                    Ok(count) => count,
                    Err(retry_err) => {
                        warn!(message_id, "Failed to count delivery: {}", retry_err);
                        return;
                    }
                };
                let max_retries = self.queue.max_retries();

                if retries >= max_retries {
                    warn!(
                        message_id,
                        "Message exceeded max retries ({}), moving to DLQ", max_retries
                    );
                    if let Err(dlq_err) = self.queue.dead_letter(message, &e.to_string()).await {
                        error!(message_id, "Failed to dead-letter message: {}", dlq_err);
                    }
                } else {
                    debug!(
                        message_id,
                        "Message will be redelivered (attempt {}/{})", retries, max_retries
                    );
                }
            }
            (_, Ok(_)) => {}
        }
    }
}
