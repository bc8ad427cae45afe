//! Resumable block-wise extraction workflow.
//!
//! One invocation runs the steps in a fixed order:
//! start, download, analyze, extract (per block), zip, complete.
//! State is checkpointed after every step and every block, so a redelivered
//! message continues from the last checkpoint instead of starting over.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use vframe_jobstore::{DocumentJobStateRepository, DocumentStoreClient, JobStateRepository};
use vframe_media::{
    list_block_frames, BlockRequest, FfmpegFrameExtractor, FfprobeAnalyzer, FrameExtractor,
    VideoAnalyzer,
};
use vframe_models::{
    keys, BlockWindow, CompletionNotification, JobState, JobStatus, ProcessingMessage,
    ProcessingStep, ProgressNotification, VideoMetadata,
};
use vframe_queue::{CompletionNotifier, ProgressNotifier, StreamNotifier};
use vframe_storage::{
    download_prefix, upload_files, Archiver, BlobStore, ObjectInfo, S3BlobStore, ZipArchiver,
};

use crate::cancel::{check_cancelled, race_cancel};
use crate::config::WorkerConfig;
use crate::env::ResolvedBinaries;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::workspace::JobWorkspace;

#[cfg(test)]
mod tests;

/// Operation name attached to job log events.
pub const OPERATION: &str = "frame_extraction";

/// Result of a successful invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// All remaining steps ran and the job is now complete.
    Completed,
    /// The job was already complete; nothing was done.
    AlreadyCompleted,
}

/// Settings the engine needs from the worker configuration.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub frames_bucket: String,
    pub zip_bucket: String,
    pub temp_folder: PathBuf,
    pub frame_extension: String,
    pub frame_rate: u32,
    pub block_size: u32,
    pub upload_concurrency: usize,
    pub download_concurrency: usize,
}

impl From<&WorkerConfig> for WorkflowSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            frames_bucket: config.frames_bucket.clone(),
            zip_bucket: config.zip_bucket.clone(),
            temp_folder: config.temp_folder.clone(),
            frame_extension: config.frame_extension.clone(),
            frame_rate: config.frame_rate,
            block_size: config.block_size,
            upload_concurrency: config.upload_concurrency,
            download_concurrency: config.download_concurrency,
        }
    }
}

/// Collaborators used by the engine.
#[derive(Clone)]
pub struct WorkflowContext {
    pub blob_store: Arc<dyn BlobStore>,
    pub analyzer: Arc<dyn VideoAnalyzer>,
    pub extractor: Arc<dyn FrameExtractor>,
    pub archiver: Arc<dyn Archiver>,
    pub job_states: Arc<dyn JobStateRepository>,
    pub progress: Arc<dyn ProgressNotifier>,
    pub completion: Arc<dyn CompletionNotifier>,
}

impl WorkflowContext {
    /// Wire the production collaborators. Child processes are killed when
    /// `shutdown` fires.
    pub async fn from_config(
        config: &WorkerConfig,
        binaries: &ResolvedBinaries,
        shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<Self> {
        let blob_store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(config.s3.clone()).await?);

        let client = DocumentStoreClient::new(config.jobstore.clone())?;
        let notifier = Arc::new(StreamNotifier::new(
            &config.queue.redis_url,
            config.progress_queue.clone(),
        )?);

        let analyzer = FfprobeAnalyzer::new(binaries.ffprobe.clone())
            .with_timeout(config.probe_timeout)
            .with_cancel(shutdown.clone());
        let extractor = FfmpegFrameExtractor::new(binaries.ffmpeg.clone())
            .with_timeout(config.extract_timeout)
            .with_cancel(shutdown);

        Ok(Self {
            archiver: Arc::new(ZipArchiver::new(Arc::clone(&blob_store))),
            blob_store,
            analyzer: Arc::new(analyzer),
            extractor: Arc::new(extractor),
            job_states: Arc::new(DocumentJobStateRepository::new(client)),
            progress: notifier.clone(),
            completion: notifier,
        })
    }
}

/// Decide how a loaded state enters this invocation.
///
/// Completed jobs are skipped. Running and Interrupted jobs resume from
/// their recorded step. Anything else restarts step tracking while keeping
/// the block and frame counters.
pub fn should_skip_job(state: &mut JobState) -> bool {
    match state.status {
        JobStatus::Completed => true,
        status if status.is_resumable() => false,
        _ => {
            state.reset_for_attempt();
            false
        }
    }
}

/// Drives a single job through its steps.
pub struct WorkflowEngine {
    settings: WorkflowSettings,
    ctx: WorkflowContext,
}

impl WorkflowEngine {
    pub fn new(settings: WorkflowSettings, ctx: WorkflowContext) -> Self {
        Self { settings, ctx }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Run every step not yet completed for the message's job.
    ///
    /// On failure the job is marked `Failed` (or `Interrupted` when
    /// cancelled), persisted on a best-effort basis, and the original error
    /// is returned.
    pub async fn execute(
        &self,
        message: &ProcessingMessage,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<ExecutionOutcome> {
        let logger = JobLogger::new(&message.job_id, OPERATION);

        let mut state = match self.ctx.job_states.get(&message.job_id).await? {
            Some(state) => state,
            None => JobState::new(message.job_id.clone()),
        };

        if should_skip_job(&mut state) {
            logger.log_skip(ProcessingStep::Done, "job already completed");
            return Ok(ExecutionOutcome::AlreadyCompleted);
        }

        logger.log_start(&format!(
            "status={} step={} block={}/{}",
            state.status, state.current_step, state.current_block, state.total_blocks
        ));

        state.metadata.insert(
            "sourceBucket".to_string(),
            serde_json::Value::String(message.source_bucket.clone()),
        );
        state.metadata.insert(
            "sourceKey".to_string(),
            serde_json::Value::String(message.source_key.clone()),
        );

        match self.run_steps(message, &mut state, &cancel, &logger).await {
            Ok(()) => {
                logger.log_completion(&format!(
                    "{} frames in {} blocks",
                    state.processed_frames, state.total_blocks
                ));
                Ok(ExecutionOutcome::Completed)
            }
            Err(e) => {
                self.record_failure(&mut state, &e, &logger).await;
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        message: &ProcessingMessage,
        state: &mut JobState,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let workspace = JobWorkspace::create(&self.settings.temp_folder, &state.job_id).await?;

        self.ensure_job_started(state).await?;
        let video_path = self
            .download(message, state, &workspace, cancel, logger)
            .await?;
        let metadata = self.analyze(state, &video_path, cancel, logger).await?;
        self.extract(state, &video_path, &metadata, &workspace, cancel, logger)
            .await?;
        let (zip_bucket, zip_key) = self.zip(state, &workspace, cancel, logger).await?;
        self.complete(state, zip_bucket, zip_key).await
    }

    async fn persist(&self, state: &JobState) -> WorkerResult<()> {
        self.ctx.job_states.save(state).await?;
        Ok(())
    }

    async fn ensure_job_started(&self, state: &mut JobState) -> WorkerResult<()> {
        state.mark_running();
        state.touch();
        self.persist(state).await
    }

    async fn download(
        &self,
        message: &ProcessingMessage,
        state: &mut JobState,
        workspace: &JobWorkspace,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<PathBuf> {
        let video_path = workspace.source_path(message.source_extension());

        if state.is_extraction_complete() {
            logger.log_skip(ProcessingStep::Downloading, "all blocks already extracted");
            return Ok(video_path);
        }

        let local_present = tokio::fs::try_exists(&video_path).await.unwrap_or(false);
        if state.current_step > ProcessingStep::Downloading && local_present {
            logger.log_skip(ProcessingStep::Downloading, "source already on disk");
            return Ok(video_path);
        }

        state.enter_step(ProcessingStep::Downloading);
        logger.log_step(
            ProcessingStep::Downloading,
            &format!("Downloading {}/{}", message.source_bucket, message.source_key),
        );

        race_cancel(
            cancel,
            self.ctx
                .blob_store
                .download_file(&message.source_bucket, &message.source_key, &video_path),
        )
        .await?;

        state.touch();
        self.persist(state).await?;
        Ok(video_path)
    }

    async fn analyze(
        &self,
        state: &mut JobState,
        video_path: &Path,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<VideoMetadata> {
        if state.has_analysis() {
            let duration = state
                .duration_seconds
                .unwrap_or(state.total_blocks as f64 * self.settings.block_size as f64);
            logger.log_skip(ProcessingStep::Analyzing, "analysis already recorded");
            return Ok(VideoMetadata::new(duration, state.total_frames));
        }

        state.enter_step(ProcessingStep::Analyzing);
        logger.log_step(ProcessingStep::Analyzing, "Probing video");

        let metadata = race_cancel(cancel, self.ctx.analyzer.analyze(video_path)).await?;

        state.total_frames = metadata.frame_count;
        state.duration_seconds = Some(metadata.duration_seconds);
        state.total_blocks =
            vframe_models::total_blocks_for(metadata.duration_seconds, self.settings.block_size);
        state.touch();

        logger.log_step(
            ProcessingStep::Analyzing,
            &format!(
                "Analysis done: {:.2}s, {} frames, {} blocks",
                metadata.duration_seconds, metadata.frame_count, state.total_blocks
            ),
        );

        self.persist(state).await?;
        Ok(metadata)
    }

    async fn extract(
        &self,
        state: &mut JobState,
        video_path: &Path,
        metadata: &VideoMetadata,
        workspace: &JobWorkspace,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        if state.current_step > ProcessingStep::Extracting {
            logger.log_skip(ProcessingStep::Extracting, "frames already extracted");
            return Ok(());
        }

        state.enter_step(ProcessingStep::Extracting);
        logger.log_step(
            ProcessingStep::Extracting,
            &format!(
                "Extracting {} blocks starting at block {}",
                state.total_blocks,
                state.current_block + 1
            ),
        );

        let frames_dir = workspace.frames_dir();
        for index in state.current_block..state.total_blocks {
            check_cancelled(cancel)?;
            self.process_block(state, index, video_path, metadata, &frames_dir, cancel, logger)
                .await?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_block(
        &self,
        state: &mut JobState,
        index: u32,
        video_path: &Path,
        metadata: &VideoMetadata,
        frames_dir: &Path,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let Some(window) =
            BlockWindow::for_block(index, metadata.duration_seconds, self.settings.block_size)
        else {
            logger.log_skip(
                ProcessingStep::Extracting,
                &format!("block {} has no remaining duration", index + 1),
            );
            return Ok(());
        };

        let request = BlockRequest::from_window(
            &window,
            self.settings.frame_rate,
            self.settings.frame_extension.clone(),
        );
        race_cancel(
            cancel,
            self.ctx.extractor.extract_block(video_path, frames_dir, &request),
        )
        .await?;

        let frames = list_block_frames(frames_dir, index, &self.settings.frame_extension).await?;
        let uploaded = frames.len() as u64;
        if !frames.is_empty() {
            let prefix = keys::block_prefix(&state.job_id, index);
            race_cancel(
                cancel,
                upload_files(
                    self.ctx.blob_store.as_ref(),
                    &self.settings.frames_bucket,
                    &prefix,
                    &frames,
                    self.settings.upload_concurrency,
                ),
            )
            .await?;

            for frame in &frames {
                if let Err(e) = tokio::fs::remove_file(frame).await {
                    logger.log_warning(&format!(
                        "Failed to remove frame {}: {}",
                        frame.display(),
                        e
                    ));
                }
            }
        }

        state.record_block(index, uploaded, window.duration_seconds);
        self.persist(state).await?;
        metrics::record_block(uploaded);
        logger.log_block(index, state.total_blocks, uploaded);

        let notification = ProgressNotification::new(
            &state.job_id,
            state.block_progress_pct(),
            state.current_block,
            state.total_blocks,
        );
        race_cancel(cancel, self.ctx.progress.notify_progress(&notification)).await?;

        Ok(())
    }

    async fn zip(
        &self,
        state: &mut JobState,
        workspace: &JobWorkspace,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<(String, String)> {
        if state.current_step > ProcessingStep::Zipping {
            if let (Some(bucket), Some(key)) = (&state.zip_bucket, &state.zip_key) {
                logger.log_skip(ProcessingStep::Zipping, "archive already uploaded");
                return Ok((bucket.clone(), key.clone()));
            }
        }

        state.enter_step(ProcessingStep::Zipping);
        logger.log_step(ProcessingStep::Zipping, "Collecting frames for archive");

        let archive_dir = workspace.archive_dir();
        let extension = self.settings.frame_extension.to_ascii_lowercase();
        let collected = race_cancel(
            cancel,
            download_prefix(
                self.ctx.blob_store.as_ref(),
                &self.settings.frames_bucket,
                &keys::job_prefix(&state.job_id),
                &archive_dir,
                self.settings.download_concurrency,
                |object: &ObjectInfo| has_extension(object, &extension),
            ),
        )
        .await?;

        let zip_path = workspace.zip_path();
        let archived =
            race_cancel(cancel, self.ctx.archiver.create_zip(&archive_dir, &zip_path)).await?;

        let zip_bucket = self.settings.zip_bucket.clone();
        let zip_key = keys::zip_key(&state.job_id);
        race_cancel(
            cancel,
            self.ctx.archiver.upload_zip(&zip_bucket, &zip_key, &zip_path),
        )
        .await?;

        logger.log_step(
            ProcessingStep::Zipping,
            &format!(
                "Archive of {} frames ({} collected) uploaded to {}/{}",
                archived, collected, zip_bucket, zip_key
            ),
        );

        state.set_zip_location(zip_bucket.clone(), zip_key.clone());
        state.touch();
        self.persist(state).await?;
        Ok((zip_bucket, zip_key))
    }

    async fn complete(
        &self,
        state: &mut JobState,
        zip_bucket: String,
        zip_key: String,
    ) -> WorkerResult<()> {
        state.mark_completed();
        self.persist(state).await?;

        let notification = CompletionNotification::new(&state.job_id, zip_bucket, zip_key);
        self.ctx.completion.notify_completion(&notification).await?;
        Ok(())
    }

    /// Map the error onto the stored state. Persistence errors are logged only.
    async fn record_failure(&self, state: &mut JobState, error: &WorkerError, logger: &JobLogger) {
        if state.status == JobStatus::Completed {
            // The Completed checkpoint is already durable; redelivery will not notify again.
            logger.log_error(&format!(
                "Completion notification lost after checkpoint: {}",
                error
            ));
            return;
        }

        if error.is_cancelled() {
            state.mark_interrupted();
        } else {
            state.mark_failed();
        }

        if let Err(e) = self.persist(state).await {
            logger.log_warning(&format!(
                "Failed to persist {} state: {}",
                state.status, e
            ));
        }
    }
}

fn has_extension(object: &ObjectInfo, extension: &str) -> bool {
    Path::new(object.file_name())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
