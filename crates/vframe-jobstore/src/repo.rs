//! Job state repositories.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use vframe_models::{JobId, JobState};

use crate::client::DocumentStoreClient;
use crate::document::JobStateDocument;
use crate::error::{JobStoreError, JobStoreResult};

/// Get and upsert job state by id.
#[async_trait]
pub trait JobStateRepository: Send + Sync {
    /// Load the state of a job, `None` if it was never saved.
    async fn get(&self, job_id: &JobId) -> JobStoreResult<Option<JobState>>;

    /// Upsert the full state of a job.
    async fn save(&self, state: &JobState) -> JobStoreResult<()>;
}

/// Repository backed by the document store.
#[derive(Clone)]
pub struct DocumentJobStateRepository {
    client: DocumentStoreClient,
}

impl DocumentJobStateRepository {
    pub fn new(client: DocumentStoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobStateRepository for DocumentJobStateRepository {
    async fn get(&self, job_id: &JobId) -> JobStoreResult<Option<JobState>> {
        let Some(value) = self.client.find_one(job_id.as_str()).await? else {
            debug!(job_id = %job_id, "No stored state");
            return Ok(None);
        };

        let state = JobState::try_from(JobStateDocument::from_value(value)?)?;
        Ok(Some(state))
    }

    async fn save(&self, state: &JobState) -> JobStoreResult<()> {
        let document = JobStateDocument::from(state).to_value()?;
        self.client
            .replace_one(state.job_id.as_str(), &document)
            .await?;
        debug!(
            job_id = %state.job_id,
            status = %state.status,
            step = %state.current_step,
            block = state.current_block,
            "Saved job state"
        );
        Ok(())
    }
}

/// In-memory repository that also records every saved snapshot.
#[derive(Debug, Default)]
pub struct InMemoryJobStateRepository {
    states: Mutex<HashMap<JobId, JobState>>,
    history: Mutex<Vec<JobState>>,
    fail_saves: AtomicBool,
}

impl InMemoryJobStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored state without recording it in the history.
    pub fn with_state(state: JobState) -> Self {
        let repo = Self::new();
        if let Ok(mut states) = repo.states.lock() {
            states.insert(state.job_id.clone(), state);
        }
        repo
    }

    /// Make every subsequent `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Current stored state of a job.
    pub fn current(&self, job_id: &JobId) -> Option<JobState> {
        self.states.lock().ok()?.get(job_id).cloned()
    }

    /// Every snapshot passed to a successful `save`, in order.
    pub fn history(&self) -> Vec<JobState> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl JobStateRepository for InMemoryJobStateRepository {
    async fn get(&self, job_id: &JobId) -> JobStoreResult<Option<JobState>> {
        let states = self
            .states
            .lock()
            .map_err(|_| JobStoreError::request_failed("state lock poisoned"))?;
        Ok(states.get(job_id).cloned())
    }

    async fn save(&self, state: &JobState) -> JobStoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(JobStoreError::from_http_status(503, "save rejected"));
        }

        self.states
            .lock()
            .map_err(|_| JobStoreError::request_failed("state lock poisoned"))?
            .insert(state.job_id.clone(), state.clone());
        self.history
            .lock()
            .map_err(|_| JobStoreError::request_failed("history lock poisoned"))?
            .push(state.clone());
        Ok(())
    }
}
