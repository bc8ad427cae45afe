use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use vframe_jobstore::{InMemoryJobStateRepository, JobStoreError, JobStoreResult};
use vframe_media::{block_frame_name, MediaError, MediaResult};
use vframe_models::{JobId, NotificationStatus};
use vframe_queue::RecordingNotifier;
use vframe_storage::{InMemoryBlobStore, ZipArchiver};

use super::*;

const SOURCE_BUCKET: &str = "uploads";
const SOURCE_KEY: &str = "videos/a.mp4";
const FRAMES_BUCKET: &str = "frames";
const ZIP_BUCKET: &str = "zips";

struct FakeAnalyzer {
    metadata: VideoMetadata,
    calls: AtomicUsize,
}

#[async_trait]
impl VideoAnalyzer for FakeAnalyzer {
    async fn analyze(&self, path: &Path) -> MediaResult<VideoMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        Ok(self.metadata)
    }
}

#[derive(Default)]
struct FakeExtractor {
    frames_per_block: u32,
    fail_on: Option<u32>,
    stall_on: Option<u32>,
    requests: Mutex<Vec<BlockRequest>>,
}

impl FakeExtractor {
    fn requests(&self) -> Vec<BlockRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn indices(&self) -> Vec<u32> {
        self.requests().iter().map(|r| r.index).collect()
    }
}

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn extract_block(
        &self,
        _video: &Path,
        output_dir: &Path,
        request: &BlockRequest,
    ) -> MediaResult<()> {
        self.requests.lock().unwrap().push(request.clone());

        if self.fail_on == Some(request.index) {
            return Err(MediaError::command_failed("ffmpeg", Some(1), "corrupt packet"));
        }
        if self.stall_on == Some(request.index) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        tokio::fs::create_dir_all(output_dir).await?;
        for n in 1..=self.frames_per_block {
            let name = block_frame_name(request.index, n, &request.extension);
            tokio::fs::write(output_dir.join(name), b"jpeg").await?;
        }
        Ok(())
    }
}

/// Counts ERROR-level events emitted while installed.
#[derive(Clone, Default)]
struct ErrorEvents(Arc<AtomicUsize>);

impl ErrorEvents {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> Layer<S> for ErrorEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Repository that starts rejecting saves after a number of successes.
struct FlakyRepository {
    inner: InMemoryJobStateRepository,
    allowed_saves: usize,
    saves: AtomicUsize,
}

#[async_trait]
impl JobStateRepository for FlakyRepository {
    async fn get(&self, job_id: &JobId) -> JobStoreResult<Option<JobState>> {
        self.inner.get(job_id).await
    }

    async fn save(&self, state: &JobState) -> JobStoreResult<()> {
        if self.saves.fetch_add(1, Ordering::SeqCst) >= self.allowed_saves {
            return Err(JobStoreError::from_http_status(503, "unavailable"));
        }
        self.inner.save(state).await
    }
}

struct Harness {
    temp: TempDir,
    store: Arc<InMemoryBlobStore>,
    analyzer: Arc<FakeAnalyzer>,
    extractor: Arc<FakeExtractor>,
    repo: Arc<InMemoryJobStateRepository>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(duration_seconds: f64, frame_count: u64, extractor: FakeExtractor) -> Self {
        let store = Arc::new(InMemoryBlobStore::new());
        store.insert(SOURCE_BUCKET, SOURCE_KEY, b"video bytes".to_vec());

        Self {
            temp: tempfile::tempdir().unwrap(),
            store,
            analyzer: Arc::new(FakeAnalyzer {
                metadata: VideoMetadata::new(duration_seconds, frame_count),
                calls: AtomicUsize::new(0),
            }),
            extractor: Arc::new(extractor),
            repo: Arc::new(InMemoryJobStateRepository::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    fn with_state(mut self, state: JobState) -> Self {
        self.repo = Arc::new(InMemoryJobStateRepository::with_state(state));
        self
    }

    fn settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            frames_bucket: FRAMES_BUCKET.to_string(),
            zip_bucket: ZIP_BUCKET.to_string(),
            temp_folder: self.temp.path().to_path_buf(),
            frame_extension: "jpg".to_string(),
            frame_rate: 1,
            block_size: 30,
            upload_concurrency: 4,
            download_concurrency: 4,
        }
    }

    fn engine_with_repo(&self, job_states: Arc<dyn JobStateRepository>) -> WorkflowEngine {
        let blob_store: Arc<dyn BlobStore> = self.store.clone();
        let ctx = WorkflowContext {
            blob_store: Arc::clone(&blob_store),
            analyzer: self.analyzer.clone(),
            extractor: self.extractor.clone(),
            archiver: Arc::new(ZipArchiver::new(blob_store)),
            job_states,
            progress: self.notifier.clone(),
            completion: self.notifier.clone(),
        };
        WorkflowEngine::new(self.settings(), ctx)
    }

    fn engine(&self) -> WorkflowEngine {
        self.engine_with_repo(self.repo.clone())
    }

    fn workspace_root(&self) -> PathBuf {
        JobWorkspace::root_for(self.temp.path(), &job_id())
    }

    /// Leave a local source copy behind as an earlier attempt would.
    fn place_local_source(&self) {
        let root = self.workspace_root();
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("source.mp4"), b"video bytes").unwrap();
    }

    fn analyzer_calls(&self) -> usize {
        self.analyzer.calls.load(Ordering::SeqCst)
    }
}

fn job_id() -> JobId {
    JobId::from("vid")
}

fn message() -> ProcessingMessage {
    ProcessingMessage::new("vid", SOURCE_BUCKET, SOURCE_KEY)
}

fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

fn extractor(frames_per_block: u32) -> FakeExtractor {
    FakeExtractor {
        frames_per_block,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_run_completes() {
    let h = Harness::new(95.0, 8, extractor(2));

    let outcome = h.engine().execute(&message(), no_cancel()).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Completed);

    // Four blocks, the last one five seconds long
    let requests = h.extractor.requests();
    assert_eq!(h.extractor.indices(), vec![0, 1, 2, 3]);
    assert_eq!(requests[3].start_seconds, 90.0);
    assert_eq!(requests[3].duration_seconds, 5.0);
    assert!(requests[..3].iter().all(|r| r.duration_seconds == 30.0));
    assert_eq!(h.analyzer_calls(), 1);

    let frame_keys = h.store.keys(FRAMES_BUCKET);
    assert_eq!(frame_keys.len(), 8);
    assert!(frame_keys.contains(&"vid/block_1/block0000_frame0001.jpg".to_string()));
    assert!(frame_keys.contains(&"vid/block_4/block0003_frame0002.jpg".to_string()));

    let zip = h.store.get(ZIP_BUCKET, "vid/vid.zip").unwrap();
    assert!(!zip.is_empty());

    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.current_step, ProcessingStep::Done);
    assert!(state.completed_at.is_some());
    assert_eq!(state.current_block, 4);
    assert_eq!(state.total_blocks, 4);
    assert_eq!(state.processed_frames, 8);
    assert_eq!(state.total_frames, 8);
    assert_eq!(state.progress, 100);
    assert_eq!(state.last_processed_second, 95.0);
    assert_eq!(state.duration_seconds, Some(95.0));
    assert_eq!(state.zip_bucket.as_deref(), Some(ZIP_BUCKET));
    assert_eq!(state.zip_key.as_deref(), Some("vid/vid.zip"));
    assert_eq!(state.metadata["sourceKey"], SOURCE_KEY);

    let progress: Vec<u8> = h.notifier.progress().iter().map(|p| p.progress).collect();
    assert_eq!(progress, vec![25, 50, 75, 100]);

    assert!(!h.workspace_root().exists());
}

#[tokio::test]
async fn test_completion_payload() {
    let h = Harness::new(10.0, 0, extractor(1));
    h.engine().execute(&message(), no_cancel()).await.unwrap();

    let completions = h.notifier.completions();
    assert_eq!(completions.len(), 1);

    let body = serde_json::to_value(&completions[0]).unwrap();
    assert_eq!(body["video_id"], "vid");
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["zip"]["bucket"], ZIP_BUCKET);
    assert_eq!(body["zip"]["key"], "vid/vid.zip");
    assert_eq!(completions[0].status, NotificationStatus::Completed);
}

#[tokio::test]
async fn test_completed_job_is_not_reprocessed() {
    let mut done = JobState::new("vid");
    done.mark_completed();
    let h = Harness::new(95.0, 8, extractor(2)).with_state(done);

    let outcome = h.engine().execute(&message(), no_cancel()).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::AlreadyCompleted);

    assert_eq!(h.analyzer_calls(), 0);
    assert!(h.extractor.requests().is_empty());
    assert_eq!(h.store.download_count(), 0);
    assert_eq!(h.store.upload_count(), 0);
    assert!(h.notifier.progress().is_empty());
    assert!(h.notifier.completions().is_empty());
    assert_eq!(h.repo.save_count(), 0);
}

fn interrupted_at_block(current_block: u32, total_blocks: u32) -> JobState {
    let mut state = JobState::new("vid");
    state.mark_running();
    state.status = JobStatus::Interrupted;
    state.current_step = ProcessingStep::Extracting;
    state.total_blocks = total_blocks;
    state.current_block = current_block;
    state
}

#[tokio::test]
async fn test_resume_mid_extraction() {
    let h = Harness::new(150.0, 0, extractor(1)).with_state(interrupted_at_block(2, 5));
    // Not in storage: any attempt to download the source would fail
    let h = Harness {
        store: Arc::new(InMemoryBlobStore::new()),
        ..h
    };
    h.place_local_source();

    h.engine().execute(&message(), no_cancel()).await.unwrap();

    assert_eq!(h.extractor.indices(), vec![2, 3, 4]);
    assert_eq!(h.analyzer_calls(), 0);

    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.current_block, 5);
    assert_eq!(state.processed_frames, 3);
}

#[tokio::test]
async fn test_resume_without_local_source_downloads_again() {
    let h = Harness::new(150.0, 0, extractor(1)).with_state(interrupted_at_block(3, 5));

    h.engine().execute(&message(), no_cancel()).await.unwrap();

    assert_eq!(h.extractor.indices(), vec![3, 4]);
    assert_eq!(h.analyzer_calls(), 0);
    // Source once, then the two uploaded frames for the archive
    assert_eq!(h.store.download_count(), 3);
}

#[tokio::test]
async fn test_resume_uses_recorded_duration_for_last_block() {
    let mut state = interrupted_at_block(3, 4);
    state.duration_seconds = Some(95.0);
    let h = Harness::new(95.0, 0, extractor(1)).with_state(state);

    h.engine().execute(&message(), no_cancel()).await.unwrap();

    let requests = h.extractor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].duration_seconds, 5.0);
}

#[tokio::test]
async fn test_zero_duration_video_has_one_block() {
    let h = Harness::new(0.0, 0, extractor(1));

    let outcome = h.engine().execute(&message(), no_cancel()).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Completed);

    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.total_blocks, 1);
    // The only block has no duration, so the extractor is never invoked
    assert!(h.extractor.requests().is_empty());
    assert_eq!(state.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_short_video_has_one_block() {
    let h = Harness::new(12.5, 12, extractor(3));
    h.engine().execute(&message(), no_cancel()).await.unwrap();

    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.total_blocks, 1);
    assert_eq!(h.extractor.requests()[0].duration_seconds, 12.5);
}

#[tokio::test]
async fn test_failure_on_second_block_marks_job_failed() {
    let failing = FakeExtractor {
        frames_per_block: 2,
        fail_on: Some(1),
        ..Default::default()
    };
    let h = Harness::new(150.0, 10, failing);

    let err = h.engine().execute(&message(), no_cancel()).await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Media(MediaError::CommandFailed { ref stderr, .. }) if stderr == "corrupt packet"
    ));

    let history = h.repo.history();
    let after_first_block = history
        .iter()
        .position(|s| s.current_block == 1 && s.status == JobStatus::Running)
        .expect("checkpoint after first block");
    assert!(history.len() - after_first_block >= 2);

    let last = history.last().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(last.current_block, 1);
    assert!(last.completed_at.is_none());
    assert!(h.notifier.completions().is_empty());
    assert!(!h.workspace_root().exists());
}

#[tokio::test]
async fn test_failed_job_restarts_from_recorded_block() {
    let mut state = interrupted_at_block(2, 4);
    state.status = JobStatus::Failed;
    state.total_frames = 100;
    state.duration_seconds = Some(95.0);
    let h = Harness::new(95.0, 100, extractor(1)).with_state(state);

    h.engine().execute(&message(), no_cancel()).await.unwrap();

    // Step tracking restarts, so the source is fetched again
    let first_save = &h.repo.history()[0];
    assert_eq!(first_save.status, JobStatus::Running);
    assert_eq!(first_save.current_step, ProcessingStep::Validating);
    assert_eq!(h.analyzer_calls(), 0);
    assert_eq!(h.extractor.indices(), vec![2, 3]);
}

#[tokio::test]
async fn test_failed_after_extraction_completes_without_frame_count() {
    let mut state = JobState::new("vid");
    state.mark_running();
    state.status = JobStatus::Failed;
    state.current_step = ProcessingStep::Zipping;
    state.total_blocks = 2;
    state.current_block = 2;
    state.processed_frames = 2;
    state.duration_seconds = Some(60.0);
    let h = Harness::new(60.0, 0, extractor(1)).with_state(state);
    // Source is gone from storage; only the uploaded frames remain
    let h = Harness {
        store: Arc::new(InMemoryBlobStore::new()),
        ..h
    };
    h.store.insert(FRAMES_BUCKET, "vid/block_1/block0000_frame0001.jpg", b"jpeg".to_vec());
    h.store.insert(FRAMES_BUCKET, "vid/block_2/block0001_frame0001.jpg", b"jpeg".to_vec());

    let outcome = h.engine().execute(&message(), no_cancel()).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Completed);

    assert_eq!(h.analyzer_calls(), 0);
    assert!(h.extractor.requests().is_empty());
    assert!(h.store.get(ZIP_BUCKET, "vid/vid.zip").is_some());

    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.total_frames, 0);
    assert_eq!(h.notifier.completions().len(), 1);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let h = Harness::new(200.0, 14, extractor(2));
    h.engine().execute(&message(), no_cancel()).await.unwrap();

    let history = h.repo.history();
    for pair in history.windows(2) {
        assert!(pair[1].current_block >= pair[0].current_block);
        assert!(pair[1].processed_frames >= pair[0].processed_frames);
        assert!(pair[1].progress >= pair[0].progress);
        assert!(pair[1].current_step >= pair[0].current_step);
    }

    let before_completed = &history[history.len() - 2];
    assert_ne!(before_completed.status, JobStatus::Completed);
    assert_eq!(before_completed.current_block, before_completed.total_blocks);
    assert_eq!(history.last().unwrap().status, JobStatus::Completed);

    let blocks: Vec<u32> = h.notifier.progress().iter().map(|p| p.current_block).collect();
    assert_eq!(blocks, (1..=7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cancelled_before_start_marks_interrupted() {
    let h = Harness::new(95.0, 8, extractor(2));
    let (_tx, rx) = watch::channel(true);

    let err = h.engine().execute(&message(), rx).await.unwrap_err();
    assert!(err.is_cancelled());

    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.status, JobStatus::Interrupted);
    assert_eq!(h.analyzer_calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_block_keeps_finished_blocks() {
    let stalling = FakeExtractor {
        frames_per_block: 1,
        stall_on: Some(1),
        ..Default::default()
    };
    let h = Harness::new(95.0, 0, stalling);
    let engine = h.engine();
    let (tx, rx) = watch::channel(false);
    let msg = message();

    let (result, _) = tokio::join!(engine.execute(&msg, rx), async {
        while h.extractor.requests().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
    });

    assert!(matches!(result, Err(WorkerError::Cancelled)));
    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.status, JobStatus::Interrupted);
    assert_eq!(state.current_block, 1);
    assert_eq!(state.current_step, ProcessingStep::Extracting);
}

#[tokio::test]
async fn test_persist_error_while_recording_failure_is_not_returned() {
    let failing = FakeExtractor {
        fail_on: Some(0),
        ..Default::default()
    };
    let h = Harness::new(60.0, 0, failing);
    // start, download, analyze succeed; the Failed checkpoint does not
    let repo = Arc::new(FlakyRepository {
        inner: InMemoryJobStateRepository::new(),
        allowed_saves: 3,
        saves: AtomicUsize::new(0),
    });

    let err = h
        .engine_with_repo(repo.clone())
        .execute(&message(), no_cancel())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Media(MediaError::CommandFailed { .. })));
    let stored = repo.inner.current(&job_id()).unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.current_step, ProcessingStep::Analyzing);
}

#[tokio::test]
async fn test_recorded_archive_is_reused() {
    let mut state = JobState::new("vid");
    state.mark_running();
    state.current_step = ProcessingStep::Done;
    state.total_blocks = 2;
    state.current_block = 2;
    state.total_frames = 4;
    state.set_zip_location("old-zips", "vid/vid.zip");
    let h = Harness::new(60.0, 4, extractor(2)).with_state(state);

    h.engine().execute(&message(), no_cancel()).await.unwrap();

    assert!(h.extractor.requests().is_empty());
    assert!(h.store.get(ZIP_BUCKET, "vid/vid.zip").is_none());
    assert_eq!(h.notifier.completions()[0].zip.bucket, "old-zips");
}

#[tokio::test]
async fn test_completion_notification_failure_keeps_completed_state() {
    let h = Harness::new(30.0, 0, extractor(1));
    let engine = h.engine();

    // Progress goes through; completion is rejected
    let notifier = Arc::new(RecordingNotifier::new());
    notifier.set_fail(true);
    let engine = WorkflowEngine::new(
        engine.settings().clone(),
        WorkflowContext {
            completion: notifier,
            ..engine.ctx.clone()
        },
    );

    let errors = ErrorEvents::default();
    let subscriber = tracing_subscriber::registry().with(errors.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let err = engine.execute(&message(), no_cancel()).await.unwrap_err();
    assert!(matches!(err, WorkerError::Queue(_)));
    assert_eq!(errors.count(), 1);

    let state = h.repo.current(&job_id()).unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert!(state.completed_at.is_some());
}

#[test]
fn test_should_skip_job() {
    let mut completed = JobState::new("a");
    completed.mark_completed();
    assert!(should_skip_job(&mut completed));

    let mut running = JobState::new("b");
    running.status = JobStatus::Running;
    running.current_step = ProcessingStep::Zipping;
    assert!(!should_skip_job(&mut running));
    assert_eq!(running.current_step, ProcessingStep::Zipping);

    let mut interrupted = JobState::new("c");
    interrupted.status = JobStatus::Interrupted;
    interrupted.current_step = ProcessingStep::Extracting;
    assert!(!should_skip_job(&mut interrupted));
    assert_eq!(interrupted.status, JobStatus::Interrupted);

    let mut failed = JobState::new("d");
    failed.status = JobStatus::Failed;
    failed.current_step = ProcessingStep::Extracting;
    failed.current_block = 3;
    failed.processed_frames = 9;
    assert!(!should_skip_job(&mut failed));
    assert_eq!(failed.status, JobStatus::Pending);
    assert_eq!(failed.current_step, ProcessingStep::Validating);
    assert_eq!(failed.current_block, 3);
    assert_eq!(failed.processed_frames, 9);
}

#[test]
fn test_has_extension() {
    let object = |key: &str| ObjectInfo {
        key: key.to_string(),
        size: 1,
        last_modified: None,
    };
    assert!(has_extension(&object("vid/block_1/block0000_frame0001.jpg"), "jpg"));
    assert!(has_extension(&object("vid/block_1/block0000_frame0001.JPG"), "jpg"));
    assert!(!has_extension(&object("vid/vid.zip"), "jpg"));
    assert!(!has_extension(&object("vid/block_1/"), "jpg"));
}
