//! Chain orchestrator.
//!
//! Owns the in-memory admission queue and drives every admitted chain
//! through `planning -> generating -> concatenating -> completed`. Any
//! stage failure goes through one retry policy: re-queue once, then fail
//! for good.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn, Instrument};

use vchain_media::{fs_utils, Concatenator, FrameResizer, MediaToolkit};
use vchain_models::{
    chain_cost, ChainId, ChainJob, ChainRequest, ChainResult, ChainResultMetadata, ChainStatus,
    SegmentResult,
};
use vchain_storage::{final_video_key, thumbnail_key, ObjectStorage};
use vchain_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::{ChainError, WorkerResult};
use crate::generator::{ContinuitySegmentGenerator, GenerationConfig, SegmentObserver, SegmentTask};
use crate::llm::PlanningLlm;
use crate::logging::ChainLogger;
use crate::metrics;
use crate::notifier::{ChainEvent, ChainNotifier};
use crate::planner::SegmentPlanner;
use crate::reclaim::chain_work_dir;
use crate::video_api::VideoGenerationApi;

/// Progress reported once every segment is downloaded.
pub const CONCAT_PROGRESS: u8 = 95;
/// Ceiling for progress while segments are still generating.
const GENERATING_PROGRESS_CAP: u8 = CONCAT_PROGRESS - 1;

/// Error message stored on chains found mid-pipeline at startup.
pub const RESTART_INTERRUPTED: &str = "interrupted by worker restart";

/// External services a chain needs.
#[derive(Clone)]
pub struct ChainDeps {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub video_api: Arc<dyn VideoGenerationApi>,
    pub llm: Arc<dyn PlanningLlm>,
    pub toolkit: Arc<dyn MediaToolkit>,
    pub resizer: Arc<dyn FrameResizer>,
    pub notifier: Arc<dyn ChainNotifier>,
}

/// State shared with spawned chain tasks.
struct ChainContext {
    config: WorkerConfig,
    deps: ChainDeps,
    planner: SegmentPlanner,
    concatenator: Concatenator,
    queue: Mutex<VecDeque<ChainId>>,
    active: Mutex<HashSet<ChainId>>,
    abort: watch::Receiver<bool>,
}

/// Top-level chain state machine and queue.
pub struct ChainOrchestrator {
    ctx: Arc<ChainContext>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    abort: watch::Sender<bool>,
}

impl ChainOrchestrator {
    pub fn new(config: WorkerConfig, deps: ChainDeps) -> Self {
        let config = config.normalized();
        let max_concurrent = config.max_concurrent;
        let (shutdown, _) = watch::channel(false);
        let (abort, abort_rx) = watch::channel(false);
        let ctx = ChainContext {
            planner: SegmentPlanner::new(Arc::clone(&deps.llm)),
            concatenator: Concatenator::new(Arc::clone(&deps.toolkit)),
            config,
            deps,
            queue: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashSet::new()),
            abort: abort_rx,
        };

        Self {
            ctx: Arc::new(ctx),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            shutdown,
            abort,
        }
    }

    /// Validate a request, persist it as `queued` and enqueue it.
    pub async fn submit(&self, request: ChainRequest) -> WorkerResult<ChainJob> {
        let job = ChainJob::from_request(request)?;
        self.ctx.deps.store.create(&job).await?;
        info!(
            chain_id = %job.id,
            segments = job.num_segments,
            seconds_per_segment = job.seconds_per_segment,
            model = %job.model,
            size = %job.size,
            "Chain submitted"
        );
        self.enqueue(job.id.clone());
        Ok(job)
    }

    /// Append a chain id to the admission queue.
    pub fn enqueue(&self, id: ChainId) {
        self.ctx.enqueue(id);
    }

    /// Ids waiting for admission, in order.
    pub fn queued_ids(&self) -> Vec<ChainId> {
        self.ctx.queue_snapshot()
    }

    /// Chains currently being processed.
    pub fn in_flight(&self) -> usize {
        self.ctx.config.max_concurrent - self.semaphore.available_permits()
    }

    /// One admission round.
    ///
    /// Dequeues ids until the concurrency cap is reached or the queue is
    /// empty. Only chains whose persisted status is exactly `queued` are
    /// started; everything else is dropped from the queue. Returns the
    /// number of chains started. Entries for a chain that is still running
    /// (a retry re-queued before its task released it) stay queued.
    pub async fn tick(&self) -> usize {
        let mut admitted = 0;
        let mut deferred = Vec::new();
        loop {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            let Some(id) = self.ctx.dequeue() else {
                break;
            };
            if self.ctx.is_active(&id) {
                debug!(chain_id = %id, "Chain still running, deferring queue entry");
                deferred.push(id);
                continue;
            }

            match self.ctx.deps.store.get(&id).await {
                Ok(Some(job)) if job.status == ChainStatus::Queued => {}
                Ok(Some(job)) => {
                    debug!(chain_id = %id, status = %job.status, "Skipping non-queued chain");
                    continue;
                }
                Ok(None) => {
                    debug!(chain_id = %id, "Skipping deleted chain");
                    continue;
                }
                Err(e) => {
                    warn!(chain_id = %id, "Failed to load queued chain, will retry next tick: {}", e);
                    self.ctx.enqueue_front(id);
                    break;
                }
            }

            self.ctx.set_active(&id, true);
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = ctx.process_chain(&id).await {
                    warn!(chain_id = %id, "Chain processing ended with an error: {}", e);
                }
                ctx.set_active(&id, false);
            });
            admitted += 1;
        }
        for id in deferred.into_iter().rev() {
            self.ctx.enqueue_front(id);
        }

        metrics::set_chains_in_flight(self.in_flight());
        admitted
    }

    /// Run one chain to its next resting state on the current task.
    ///
    /// Returns `completed`, `failed`, or `queued` when the failure was
    /// re-queued for an automatic retry.
    pub async fn process_chain(&self, id: &ChainId) -> WorkerResult<ChainStatus> {
        self.ctx.process_chain(id).await
    }

    /// Manually re-queue a failed chain with a fresh retry budget.
    pub async fn retry_chain(&self, id: &ChainId) -> WorkerResult<ChainJob> {
        let store = &self.ctx.deps.store;
        let mut job = store.get(id).await?.ok_or_else(|| ChainError::not_found(id))?;
        job.transition(ChainStatus::Queued)?;
        job.reset_pipeline_state();
        job.retry_count = 0;
        job.error_message = None;
        store.update(&job).await?;
        info!(chain_id = %id, "Chain re-queued manually");
        self.enqueue(id.clone());
        Ok(job)
    }

    /// Forget a chain: queue entry, job row, uploaded artifacts and work dir.
    ///
    /// A chain that is still running is not cancelled; its remaining
    /// bookkeeping writes simply fail. Returns whether the job existed.
    pub async fn delete_chain(&self, id: &ChainId) -> WorkerResult<bool> {
        self.ctx.remove_from_queue(id);

        let store = &self.ctx.deps.store;
        let job = store.get(id).await?;
        let existed = store.delete(id).await?;

        if let Some(job) = job {
            let storage = &self.ctx.deps.storage;
            if job.final_video_url.is_some() {
                if let Err(e) = storage.delete(&final_video_key(id)).await {
                    warn!(chain_id = %id, "Failed to delete final video: {}", e);
                }
            }
            if job.thumbnail_url.is_some() {
                if let Err(e) = storage.delete(&thumbnail_key(id)).await {
                    warn!(chain_id = %id, "Failed to delete thumbnail: {}", e);
                }
            }
        }

        fs_utils::remove_dir_best_effort(chain_work_dir(&self.ctx.config.work_dir, id)).await;
        info!(chain_id = %id, existed, "Chain deleted");
        Ok(existed)
    }

    /// Startup recovery.
    ///
    /// Enqueues every persisted `queued` chain. Chains left in a running
    /// state by a previous process are failed and sent through the retry
    /// policy. Returns the number of ids enqueued.
    pub async fn recover_queued(&self) -> WorkerResult<usize> {
        let store = &self.ctx.deps.store;
        let before = self.ctx.queue_len();

        for job in store.list_by_status(ChainStatus::Queued).await? {
            self.enqueue(job.id);
        }

        for &status in ChainStatus::all().iter().filter(|s| s.is_running()) {
            for mut job in store.list_by_status(status).await? {
                warn!(chain_id = %job.id, status = %status, "Found chain stranded by a restart");
                job.fail(RESTART_INTERRUPTED)?;
                self.ctx.apply_retry_policy(job, "interrupted", None).await?;
            }
        }

        let recovered = self.ctx.queue_len().saturating_sub(before);
        info!(recovered, "Recovered queued chains");
        Ok(recovered)
    }

    /// Tick until [`ChainOrchestrator::shutdown`] is called.
    ///
    /// In-flight chains get `shutdown_timeout` to finish. After that their
    /// polling is cancelled and they fail as interrupted.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            max_concurrent = self.ctx.config.max_concurrent,
            tick_ms = self.ctx.config.tick_interval.as_millis() as u64,
            "Starting chain orchestrator"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.ctx.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !*shutdown_rx.borrow() {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(in_flight = self.in_flight(), "Shutdown requested, waiting for in-flight chains");
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_idle())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached, interrupting in-flight chains");
            let _ = self.abort.send(true);
            self.wait_idle().await;
        }

        info!("Chain orchestrator stopped");
        Ok(())
    }

    /// Stop admitting chains and let [`ChainOrchestrator::run`] return.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait until no chain is running.
    pub async fn wait_idle(&self) {
        let max = self.ctx.config.max_concurrent.max(1);
        while self.semaphore.available_permits() < max {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl ChainContext {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<ChainId>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn enqueue(&self, id: ChainId) {
        debug!(chain_id = %id, "Chain enqueued");
        self.lock_queue().push_back(id);
    }

    fn enqueue_front(&self, id: ChainId) {
        self.lock_queue().push_front(id);
    }

    fn dequeue(&self) -> Option<ChainId> {
        self.lock_queue().pop_front()
    }

    fn remove_from_queue(&self, id: &ChainId) {
        self.lock_queue().retain(|queued| queued != id);
    }

    fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    fn queue_snapshot(&self) -> Vec<ChainId> {
        self.lock_queue().iter().cloned().collect()
    }

    fn is_active(&self, id: &ChainId) -> bool {
        self.active.lock().map(|a| a.contains(id)).unwrap_or(false)
    }

    fn set_active(&self, id: &ChainId, active: bool) {
        if let Ok(mut set) = self.active.lock() {
            if active {
                set.insert(id.clone());
            } else {
                set.remove(id);
            }
        }
    }

    async fn process_chain(&self, id: &ChainId) -> WorkerResult<ChainStatus> {
        let job = self
            .deps
            .store
            .get(id)
            .await?
            .ok_or_else(|| ChainError::not_found(id))?;
        if job.status != ChainStatus::Queued {
            return Err(ChainError::InvalidTransition(vchain_models::InvalidTransition {
                from: job.status,
                to: ChainStatus::Planning,
            }));
        }

        let logger = ChainLogger::new(&job.id, job.status);
        let span = logger.create_span();
        self.run_chain(job, logger).instrument(span).await
    }

    async fn run_chain(&self, mut job: ChainJob, mut logger: ChainLogger) -> WorkerResult<ChainStatus> {
        logger.log_start(&format!(
            "{} x {}s segments, model {}, size {}, attempt {}",
            job.num_segments,
            job.seconds_per_segment,
            job.model,
            job.size,
            job.retry_count + 1
        ));
        metrics::record_chain_started();
        let started = Instant::now();
        let work_dir = chain_work_dir(&self.config.work_dir, &job.id);

        match self.run_pipeline(&mut job, &work_dir, &mut logger).await {
            Ok(total_cost) => {
                fs_utils::remove_dir_best_effort(&work_dir).await;
                metrics::record_chain_completed(started.elapsed().as_secs_f64(), total_cost);
                logger.log_completion(&format!(
                    "{} in {:.1}s, cost ${:.2}",
                    job.final_video_url.as_deref().unwrap_or_default(),
                    started.elapsed().as_secs_f64(),
                    total_cost
                ));
                self.notify(&job, Some(total_cost)).await;
                Ok(ChainStatus::Completed)
            }
            Err(err) => {
                logger.log_error(&err.to_string());
                let stage = err.stage();
                job.fail(err.to_string())?;
                self.apply_retry_policy(job, stage, Some(&logger)).await
            }
        }
    }

    /// Everything between `queued` and `completed`. Returns the chain cost.
    async fn run_pipeline(
        &self,
        job: &mut ChainJob,
        work_dir: &Path,
        logger: &mut ChainLogger,
    ) -> WorkerResult<f64> {
        let store = &self.deps.store;
        let resolution = job.resolution()?;

        fs_utils::remove_dir_best_effort(work_dir).await;
        tokio::fs::create_dir_all(work_dir).await?;

        // Planning
        job.transition(ChainStatus::Planning)?;
        logger.enter(ChainStatus::Planning);
        store.update(job).await?;

        let plan = self
            .planner
            .plan(&job.base_prompt, job.seconds_per_segment, job.num_segments, job.model)
            .await?;
        job.set_plan(&plan)?;
        store.update(job).await?;
        logger.log_progress(&format!("planned {} segments", plan.len()));

        // Generating
        job.transition(ChainStatus::Generating)?;
        logger.enter(ChainStatus::Generating);
        store.update(job).await?;

        let generator = ContinuitySegmentGenerator::new(
            Arc::clone(&self.deps.video_api),
            Arc::clone(&self.deps.resizer),
            Arc::clone(&self.deps.toolkit),
        )
        .with_cancel(self.abort.clone());
        let gen_config = GenerationConfig {
            model: job.model,
            size: resolution,
            poll: self.config.poll.clone(),
        };

        let tracker = JobTracker::new(Arc::clone(store), job.clone());
        let total = plan.len() as u32;
        let mut segments: Vec<SegmentResult> = Vec::with_capacity(plan.len());
        let generated: WorkerResult<()> = async {
            for (i, segment_plan) in plan.iter().enumerate() {
                let task = SegmentTask {
                    plan: segment_plan,
                    index: i as u32 + 1,
                    total,
                    previous_frame: segments.last().map(|s| s.last_frame_path.as_path()),
                    output_dir: work_dir,
                };
                let result = generator.generate(task, &gen_config, &tracker).await?;
                segments.push(result);
            }
            Ok::<(), ChainError>(())
        }
        .await;
        *job = tracker.into_job();
        generated?;
        logger.log_progress(&format!("generated {} segments", segments.len()));

        // Concatenating
        job.transition(ChainStatus::Concatenating)?;
        logger.enter(ChainStatus::Concatenating);
        job.set_progress(CONCAT_PROGRESS.max(job.progress));
        store.update(job).await?;

        let inputs: Vec<PathBuf> = segments.iter().map(|s| s.video_path.clone()).collect();
        let final_path = work_dir.join("final.mp4");
        let outcome = self
            .concatenator
            .concat(&inputs, &final_path)
            .await
            .map_err(|e| ChainError::concat_failed(&e))?;
        metrics::record_concat(outcome.strategy.as_str());
        if let Some(reason) = &outcome.fallback_reason {
            logger.log_warning(&format!("re-encoded after codec mismatch: {}", reason));
        }

        let durations: Vec<f64> = segments.iter().map(|s| s.duration).collect();
        let cost = chain_cost(job.model, resolution, job.seconds_per_segment, job.num_segments)
            .with_actual_durations(&durations);
        job.cost_details = Some(serde_json::to_string(&cost)?);

        let result = ChainResult {
            video_path: outcome.output,
            thumbnail_path: pick_thumbnail(&segments),
            metadata: ChainResultMetadata {
                size: resolution,
                model: job.model,
                total_duration: job.total_duration,
                segment_count: segments.len() as u32,
                total_cost: cost.total,
            },
            segments,
        };
        debug!(
            planned = job.total_duration,
            actual = result.actual_duration(),
            "Chain duration"
        );

        let video = tokio::fs::read(&result.video_path).await?;
        let final_video_url = self
            .deps
            .storage
            .upload(&final_video_key(&job.id), video, "video/mp4")
            .await?;
        let thumbnail_url = self.upload_thumbnail(&job.id, result.thumbnail_path.as_deref(), logger).await;

        // Completed. The row is only switched once the write lands, so a
        // failed write still fails from `concatenating`.
        let mut completed = job.clone();
        completed.final_video_url = Some(final_video_url);
        completed.thumbnail_url = thumbnail_url;
        completed.error_message = None;
        completed.transition(ChainStatus::Completed)?;
        completed.set_progress(100);
        if let Err(e) = store.update(&completed).await {
            self.remove_artifacts(&job.id).await;
            return Err(e.into());
        }
        *job = completed;
        logger.enter(ChainStatus::Completed);

        Ok(result.metadata.total_cost)
    }

    /// Upload the chain thumbnail. Failures are tolerated.
    async fn upload_thumbnail(
        &self,
        id: &ChainId,
        source: Option<&Path>,
        logger: &ChainLogger,
    ) -> Option<String> {
        let source = source?;
        let bytes = match tokio::fs::read(source).await {
            Ok(bytes) => bytes,
            Err(e) => {
                logger.log_warning(&format!("thumbnail unreadable: {}", e));
                return None;
            }
        };
        match self
            .deps
            .storage
            .upload(&thumbnail_key(id), bytes, "image/jpeg")
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                logger.log_warning(&format!("thumbnail upload failed: {}", e));
                None
            }
        }
    }

    /// Best-effort removal of uploads from an attempt that never completed.
    async fn remove_artifacts(&self, id: &ChainId) {
        for key in [final_video_key(id), thumbnail_key(id)] {
            if let Err(e) = self.deps.storage.delete(&key).await {
                warn!(chain_id = %id, key = %key, "Failed to remove uploaded artifact: {}", e);
            }
        }
    }

    /// Persist a failed chain and either re-queue it or fail it for good.
    ///
    /// `job` must already be `failed` with its message set; that state is
    /// written in a single update before anything else happens.
    async fn apply_retry_policy(
        &self,
        mut job: ChainJob,
        stage: &'static str,
        logger: Option<&ChainLogger>,
    ) -> WorkerResult<ChainStatus> {
        let store = &self.deps.store;
        store.update(&job).await?;

        if job.retry_count < self.config.max_auto_retries {
            job.retry_count += 1;
            job.transition(ChainStatus::Queued)?;
            job.reset_pipeline_state();
            store.update(&job).await?;
            metrics::record_chain_failed(stage, false);
            metrics::record_chain_retried();
            if let Some(logger) = logger {
                logger.log_warning(&format!(
                    "re-queued for automatic retry {}/{}",
                    job.retry_count, self.config.max_auto_retries
                ));
            }
            self.enqueue(job.id.clone());
            return Ok(ChainStatus::Queued);
        }

        metrics::record_chain_failed(stage, true);
        warn!(
            chain_id = %job.id,
            retries = job.retry_count,
            error = job.error_message.as_deref().unwrap_or_default(),
            "Chain failed permanently"
        );
        self.notify(&job, None).await;
        Ok(ChainStatus::Failed)
    }

    async fn notify(&self, job: &ChainJob, total_cost: Option<f64>) {
        let event = ChainEvent::from_job(job, total_cost);
        if let Err(e) = self.deps.notifier.notify(&event).await {
            warn!(chain_id = %job.id, "Chain notification failed: {}", e);
        }
    }
}

/// First provider thumbnail, else the first segment's last frame.
fn pick_thumbnail(segments: &[SegmentResult]) -> Option<PathBuf> {
    segments
        .iter()
        .find_map(|s| s.thumbnail_path.clone())
        .or_else(|| segments.first().map(|s| s.last_frame_path.clone()))
}


/// Persists generator callbacks onto the chain row.
struct JobTracker {
    store: Arc<dyn JobStore>,
    job: tokio::sync::Mutex<ChainJob>,
}

impl JobTracker {
    fn new(store: Arc<dyn JobStore>, job: ChainJob) -> Self {
        Self {
            store,
            job: tokio::sync::Mutex::new(job),
        }
    }

    fn into_job(self) -> ChainJob {
        self.job.into_inner()
    }
}

#[async_trait]
impl SegmentObserver for JobTracker {
    async fn on_submitted(&self, index: u32, external_job_id: &str) -> WorkerResult<()> {
        let mut job = self.job.lock().await;
        if !job.push_segment_job_id(external_job_id) {
            warn!(chain_id = %job.id, segment = index, "More submissions than segments");
        }
        self.store.update(&job).await?;
        Ok(())
    }

    async fn on_progress(&self, chain_progress: u8) -> WorkerResult<()> {
        let mut job = self.job.lock().await;
        let progress = chain_progress.min(GENERATING_PROGRESS_CAP).max(job.progress);
        job.set_progress(progress);
        self.store.update(&job).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::testing::{FakeVideoApi, RecordingNotifier, RecordingResizer, ScriptedLlm, ScriptedStatus};
    use tempfile::TempDir;
    use vchain_media::{FakeFailure, FakeToolkit};
    use vchain_models::VideoModel;
    use vchain_storage::MemoryStorage;
    use vchain_store::MemoryJobStore;

    struct Harness {
        orchestrator: ChainOrchestrator,
        store: Arc<MemoryJobStore>,
        storage: Arc<MemoryStorage>,
        notifier: Arc<RecordingNotifier>,
        work_dir: TempDir,
    }

    fn config(work_dir: &Path) -> WorkerConfig {
        WorkerConfig {
            work_dir: work_dir.to_path_buf(),
            poll: PollConfig {
                initial_interval: Duration::from_secs(1),
                backoff_factor: 1.5,
                max_interval: Duration::from_secs(60),
                max_attempts: 5,
            },
            ..WorkerConfig::default()
        }
    }

    fn harness_with(api: FakeVideoApi, llm: ScriptedLlm, toolkit: FakeToolkit) -> Harness {
        let work_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let storage = Arc::new(MemoryStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let deps = ChainDeps {
            store: store.clone(),
            storage: storage.clone(),
            video_api: Arc::new(api),
            llm: Arc::new(llm),
            toolkit: Arc::new(toolkit),
            resizer: Arc::new(RecordingResizer::default()),
            notifier: notifier.clone(),
        };
        Harness {
            orchestrator: ChainOrchestrator::new(config(work_dir.path()), deps),
            store,
            storage,
            notifier,
            work_dir,
        }
    }

    fn request(total: u32) -> ChainRequest {
        ChainRequest {
            base_prompt: "A red kite climbs over wind-swept dunes until it meets the clouds".to_string(),
            total_duration: total,
            seconds_per_segment: 8,
            model: VideoModel::Sora2,
            size: "1280x720".to_string(),
            user_id: Some("user-1".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_chain_completes() {
        let h = harness_with(FakeVideoApi::new(), ScriptedLlm::with_plan(2), FakeToolkit::new());
        let job = h.orchestrator.submit(request(16)).await.unwrap();

        let status = h.orchestrator.process_chain(&job.id).await.unwrap();
        assert_eq!(status, ChainStatus::Completed);

        let stored = h.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChainStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.segment_job_ids, vec!["video_1", "video_2"]);
        assert_eq!(
            stored.final_video_url.as_deref(),
            Some(format!("memory://bucket/chains/{}/final.mp4", job.id).as_str())
        );
        assert!(stored.thumbnail_url.is_some());
        assert!(stored.plan_json.is_some());
        assert!(!chain_work_dir(h.work_dir.path(), &job.id).exists());

        let events = h.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, ChainStatus::Completed);
        assert_eq!(events[0].total_cost, Some(1.6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_planning_failure_retries_once() {
        let h = harness_with(
            FakeVideoApi::new(),
            ScriptedLlm::new(vec![Err("upstream 503".to_string())]),
            FakeToolkit::new(),
        );
        let job = h.orchestrator.submit(request(16)).await.unwrap();
        assert_eq!(h.orchestrator.queued_ids(), vec![job.id.clone()]);
        h.orchestrator.tick().await;
        h.orchestrator.wait_idle().await;

        let stored = h.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChainStatus::Queued);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error_message.unwrap().contains("upstream 503"));
        assert!(h.notifier.events().is_empty());

        h.orchestrator.tick().await;
        h.orchestrator.wait_idle().await;
        let stored = h.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChainStatus::Failed);
        assert!(stored.error_message.unwrap().starts_with("Planning failed"));
        assert_eq!(h.notifier.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_respects_concurrency_cap() {
        let h = harness_with(FakeVideoApi::new(), ScriptedLlm::with_plan(2), FakeToolkit::new());
        let a = h.orchestrator.submit(request(16)).await.unwrap();
        let b = h.orchestrator.submit(request(16)).await.unwrap();

        assert_eq!(h.orchestrator.tick().await, 1);
        assert_eq!(h.orchestrator.queued_ids(), vec![b.id.clone()]);
        h.orchestrator.wait_idle().await;
        assert_eq!(h.orchestrator.tick().await, 1);
        h.orchestrator.wait_idle().await;

        for id in [&a.id, &b.id] {
            let job = h.store.get(id).await.unwrap().unwrap();
            assert_eq!(job.status, ChainStatus::Completed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_drops_non_queued_entries() {
        let h = harness_with(FakeVideoApi::new(), ScriptedLlm::with_plan(2), FakeToolkit::new());
        h.orchestrator.enqueue(ChainId::from("missing"));
        assert_eq!(h.orchestrator.tick().await, 0);
        assert!(h.orchestrator.queued_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_keeps_entries_for_running_chains() {
        let h = harness_with(FakeVideoApi::new(), ScriptedLlm::with_plan(2), FakeToolkit::new());
        let job = h.orchestrator.submit(request(16)).await.unwrap();

        h.orchestrator.ctx.set_active(&job.id, true);
        assert_eq!(h.orchestrator.tick().await, 0);
        assert_eq!(h.orchestrator.queued_ids(), vec![job.id.clone()]);

        h.orchestrator.ctx.set_active(&job.id, false);
        assert_eq!(h.orchestrator.tick().await, 1);
        h.orchestrator.wait_idle().await;
        let stored = h.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChainStatus::Completed);
    }

    /// Rejects every write that would mark a chain completed.
    struct RejectCompletedStore(MemoryJobStore);

    #[async_trait]
    impl JobStore for RejectCompletedStore {
        async fn create(&self, job: &ChainJob) -> vchain_store::StoreResult<()> {
            self.0.create(job).await
        }

        async fn get(&self, id: &ChainId) -> vchain_store::StoreResult<Option<ChainJob>> {
            self.0.get(id).await
        }

        async fn update(&self, job: &ChainJob) -> vchain_store::StoreResult<()> {
            if job.status == ChainStatus::Completed {
                return Err(vchain_store::StoreError::connection_failed("write refused"));
            }
            self.0.update(job).await
        }

        async fn delete(&self, id: &ChainId) -> vchain_store::StoreResult<bool> {
            self.0.delete(id).await
        }

        async fn list_by_status(&self, status: ChainStatus) -> vchain_store::StoreResult<Vec<ChainJob>> {
            self.0.list_by_status(status).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_completion_write_fails_chain() {
        let work_dir = TempDir::new().unwrap();
        let store = Arc::new(RejectCompletedStore(MemoryJobStore::new()));
        let storage = Arc::new(MemoryStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let deps = ChainDeps {
            store: store.clone(),
            storage: storage.clone(),
            video_api: Arc::new(FakeVideoApi::new()),
            llm: Arc::new(ScriptedLlm::with_plan(2)),
            toolkit: Arc::new(FakeToolkit::new()),
            resizer: Arc::new(RecordingResizer::default()),
            notifier: notifier.clone(),
        };
        let orchestrator = ChainOrchestrator::new(config(work_dir.path()), deps);
        let job = orchestrator.submit(request(16)).await.unwrap();

        assert_eq!(orchestrator.process_chain(&job.id).await.unwrap(), ChainStatus::Queued);
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChainStatus::Queued);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error_message.unwrap().contains("write refused"));
        assert!(store.0.history(&job.id).contains(&(ChainStatus::Failed, 95)));
        assert!(storage.keys().is_empty());

        assert_eq!(orchestrator.process_chain(&job.id).await.unwrap(), ChainStatus::Failed);
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChainStatus::Failed);
        assert!(stored.final_video_url.is_none());
        assert_eq!(notifier.events().len(), 1);
        assert_eq!(notifier.events()[0].status, ChainStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concat_failure_without_mismatch_fails_chain() {
        let h = harness_with(
            FakeVideoApi::new(),
            ScriptedLlm::with_plan(2),
            FakeToolkit::new().fail_concat_copy(FakeFailure::Other),
        );
        let job = h.orchestrator.submit(request(16)).await.unwrap();
        assert_eq!(h.orchestrator.process_chain(&job.id).await.unwrap(), ChainStatus::Queued);
        assert_eq!(h.orchestrator.process_chain(&job.id).await.unwrap(), ChainStatus::Failed);

        let stored = h.store.get(&job.id).await.unwrap().unwrap();
        assert!(stored.error_message.unwrap().starts_with("Concatenation failed:"));
        assert!(chain_work_dir(h.work_dir.path(), &job.id).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_thumbnail_upload_failure_is_tolerated() {
        let work_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let deps = ChainDeps {
            store: store.clone(),
            storage: Arc::new(MemoryStorage::default().failing_uploads("thumbnail")),
            video_api: Arc::new(FakeVideoApi::new()),
            llm: Arc::new(ScriptedLlm::with_plan(2)),
            toolkit: Arc::new(FakeToolkit::new()),
            resizer: Arc::new(RecordingResizer::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        };
        let orchestrator = ChainOrchestrator::new(config(work_dir.path()), deps);
        let job = orchestrator.submit(request(16)).await.unwrap();

        assert_eq!(orchestrator.process_chain(&job.id).await.unwrap(), ChainStatus::Completed);
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert!(stored.final_video_url.is_some());
        assert!(stored.thumbnail_url.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_chain_resets_budget() {
        let h = harness_with(
            FakeVideoApi::new(),
            ScriptedLlm::new(vec![Err("bad".to_string()), Err("bad".to_string()), Ok(ScriptedLlm::plan_json(2))]),
            FakeToolkit::new(),
        );
        let job = h.orchestrator.submit(request(16)).await.unwrap();
        h.orchestrator.process_chain(&job.id).await.unwrap();
        assert_eq!(h.orchestrator.process_chain(&job.id).await.unwrap(), ChainStatus::Failed);

        let retried = h.orchestrator.retry_chain(&job.id).await.unwrap();
        assert_eq!(retried.status, ChainStatus::Queued);
        assert_eq!(retried.retry_count, 0);
        assert!(retried.error_message.is_none());
        assert_eq!(h.orchestrator.process_chain(&job.id).await.unwrap(), ChainStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_chain_rejects_non_failed() {
        let h = harness_with(FakeVideoApi::new(), ScriptedLlm::with_plan(2), FakeToolkit::new());
        let job = h.orchestrator.submit(request(16)).await.unwrap();
        let err = h.orchestrator.retry_chain(&job.id).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidTransition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_chain_removes_everything() {
        let h = harness_with(FakeVideoApi::new(), ScriptedLlm::with_plan(2), FakeToolkit::new());
        let job = h.orchestrator.submit(request(16)).await.unwrap();
        h.orchestrator.process_chain(&job.id).await.unwrap();
        assert_eq!(h.storage.keys().len(), 2);

        let other = h.orchestrator.submit(request(16)).await.unwrap();
        assert!(h.orchestrator.delete_chain(&other.id).await.unwrap());
        assert!(!h.orchestrator.queued_ids().contains(&other.id));

        assert!(h.orchestrator.delete_chain(&job.id).await.unwrap());
        assert!(h.store.get(&job.id).await.unwrap().is_none());
        assert!(h.storage.keys().is_empty());
        assert!(!h.orchestrator.delete_chain(&job.id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_queued_requeues_stranded_chains() {
        let h = harness_with(FakeVideoApi::new(), ScriptedLlm::with_plan(2), FakeToolkit::new());

        let queued = ChainJob::from_request(request(16)).unwrap();
        h.store.create(&queued).await.unwrap();

        let mut stranded = ChainJob::from_request(request(16)).unwrap();
        stranded.transition(ChainStatus::Planning).unwrap();
        stranded.transition(ChainStatus::Generating).unwrap();
        h.store.create(&stranded).await.unwrap();

        let mut exhausted = ChainJob::from_request(request(16)).unwrap();
        exhausted.retry_count = 1;
        exhausted.transition(ChainStatus::Planning).unwrap();
        h.store.create(&exhausted).await.unwrap();

        assert_eq!(h.orchestrator.recover_queued().await.unwrap(), 2);

        let stranded = h.store.get(&stranded.id).await.unwrap().unwrap();
        assert_eq!(stranded.status, ChainStatus::Queued);
        assert_eq!(stranded.retry_count, 1);
        assert_eq!(stranded.error_message.as_deref(), Some(RESTART_INTERRUPTED));
        assert!(h
            .store
            .history(&stranded.id)
            .contains(&(ChainStatus::Failed, 0)));

        let exhausted = h.store.get(&exhausted.id).await.unwrap().unwrap();
        assert_eq!(exhausted.status, ChainStatus::Failed);
        assert_eq!(h.notifier.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_stuck_polling() {
        let work_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let deps = ChainDeps {
            store: store.clone(),
            storage: Arc::new(MemoryStorage::default()),
            video_api: Arc::new(
                FakeVideoApi::new()
                    .with_script(vec![ScriptedStatus::running(10)])
                    .repeat_last(),
            ),
            llm: Arc::new(ScriptedLlm::with_plan(2)),
            toolkit: Arc::new(FakeToolkit::new()),
            resizer: Arc::new(RecordingResizer::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        };
        let mut cfg = config(work_dir.path());
        cfg.poll.max_attempts = 1000;
        cfg.max_auto_retries = 0;
        let orchestrator = Arc::new(ChainOrchestrator::new(cfg, deps));
        let job = orchestrator.submit(request(16)).await.unwrap();

        let runner = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.run().await })
        };
        tokio::time::sleep(Duration::from_secs(10)).await;
        orchestrator.shutdown();
        runner.await.unwrap().unwrap();

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChainStatus::Failed);
        assert!(stored.error_message.unwrap().starts_with("Interrupted"));
    }
}
