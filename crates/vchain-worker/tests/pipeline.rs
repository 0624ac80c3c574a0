//! End-to-end orchestrator tests over in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vchain_media::fake::FAKE_FRAME_BYTES;
use vchain_media::{FakeFailure, FakeToolkit, ToolkitCall};
use vchain_models::{ChainRequest, ChainStatus, CostBreakdown, VideoModel};
use vchain_storage::{final_video_key, MemoryStorage};
use vchain_store::{JobStore, MemoryJobStore};
use vchain_worker::testing::{FakeVideoApi, RecordingNotifier, RecordingResizer, ScriptedLlm, ScriptedStatus};
use vchain_worker::{ChainDeps, ChainOrchestrator, PollConfig, WorkerConfig};

struct Pipeline {
    orchestrator: Arc<ChainOrchestrator>,
    store: Arc<MemoryJobStore>,
    storage: Arc<MemoryStorage>,
    api: Arc<FakeVideoApi>,
    toolkit: Arc<FakeToolkit>,
    notifier: Arc<RecordingNotifier>,
    _work_dir: TempDir,
}

struct PipelineBuilder {
    api: FakeVideoApi,
    llm: ScriptedLlm,
    toolkit: FakeToolkit,
    max_attempts: u32,
    max_auto_retries: u32,
}

impl PipelineBuilder {
    fn new(segments: u32) -> Self {
        Self {
            api: FakeVideoApi::new(),
            llm: ScriptedLlm::with_plan(segments),
            toolkit: FakeToolkit::new(),
            max_attempts: 10,
            max_auto_retries: 1,
        }
    }

    fn api(mut self, api: FakeVideoApi) -> Self {
        self.api = api;
        self
    }

    fn toolkit(mut self, toolkit: FakeToolkit) -> Self {
        self.toolkit = toolkit;
        self
    }

    fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    fn max_auto_retries(mut self, n: u32) -> Self {
        self.max_auto_retries = n;
        self
    }

    fn build(self) -> Pipeline {
        let work_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let storage = Arc::new(MemoryStorage::new("https://cdn.example.com"));
        let api = Arc::new(self.api);
        let toolkit = Arc::new(self.toolkit);
        let notifier = Arc::new(RecordingNotifier::default());

        let config = WorkerConfig {
            work_dir: work_dir.path().to_path_buf(),
            max_auto_retries: self.max_auto_retries,
            poll: PollConfig {
                initial_interval: Duration::from_secs(10),
                backoff_factor: 1.5,
                max_interval: Duration::from_secs(60),
                max_attempts: self.max_attempts,
            },
            ..WorkerConfig::default()
        };
        let deps = ChainDeps {
            store: store.clone(),
            storage: storage.clone(),
            video_api: api.clone(),
            llm: Arc::new(self.llm),
            toolkit: toolkit.clone(),
            resizer: Arc::new(RecordingResizer::default()),
            notifier: notifier.clone(),
        };

        Pipeline {
            orchestrator: Arc::new(ChainOrchestrator::new(config, deps)),
            store,
            storage,
            api,
            toolkit,
            notifier,
            _work_dir: work_dir,
        }
    }
}

impl Pipeline {
    /// One admission round, then wait for the admitted chain.
    async fn round(&self) {
        self.orchestrator.tick().await;
        self.orchestrator.wait_idle().await;
    }
}

fn request(total_duration: u32) -> ChainRequest {
    ChainRequest {
        base_prompt: "A lone hiker crosses a glacier at sunrise, wind lifting loose snow".to_string(),
        total_duration,
        seconds_per_segment: 8,
        model: VideoModel::Sora2,
        size: "1280x720".to_string(),
        user_id: Some("user-42".to_string()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_segment_chain_completes() {
    let p = PipelineBuilder::new(3).build();
    let job = p.orchestrator.submit(request(24)).await.unwrap();
    assert_eq!(job.num_segments, 3);

    p.round().await;

    let done = p.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, ChainStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.segment_job_ids, vec!["video_1", "video_2", "video_3"]);
    assert!(done.error_message.is_none());

    // Final video is the three clips in order
    let final_video = p.storage.get(&final_video_key(&job.id)).unwrap();
    assert_eq!(final_video.content_type, "video/mp4");
    let expected: Vec<u8> = ["video_1", "video_2", "video_3"]
        .iter()
        .flat_map(|id| FakeVideoApi::video_bytes(id))
        .collect();
    assert_eq!(final_video.data, expected);

    // Cost is three times a single 8s sora-2 segment
    let cost: CostBreakdown = serde_json::from_str(done.cost_details.as_deref().unwrap()).unwrap();
    assert_eq!(cost.segments.len(), 3);
    assert_eq!(cost.price_per_second, 0.10);
    assert!((cost.total - 2.4).abs() < 1e-9);
    assert_eq!(cost.billing_basis, "configured_duration");
    assert!(cost.segments.iter().all(|l| l.actual_seconds == Some(8.0)));

    let events = p.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, ChainStatus::Completed);
    assert_eq!(events[0].user_id.as_deref(), Some("user-42"));
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_hits_100_only_at_completion() {
    let api = FakeVideoApi::new().with_script(vec![
        ScriptedStatus::running(10),
        ScriptedStatus::running(40),
        ScriptedStatus::running(90),
        ScriptedStatus::completed(),
    ]);
    let p = PipelineBuilder::new(3).api(api).build();
    let job = p.orchestrator.submit(request(24)).await.unwrap();
    p.round().await;

    let history = p.store.history(&job.id);
    assert!(history.len() > 10, "progress written on every tick");
    for pair in history.windows(2) {
        assert!(pair[1].1 >= pair[0].1, "progress went backwards: {:?}", pair);
    }
    for (status, progress) in &history {
        if *progress == 100 {
            assert_eq!(*status, ChainStatus::Completed);
        }
    }
    assert_eq!(history.last(), Some(&(ChainStatus::Completed, 100)));
    assert!(history.contains(&(ChainStatus::Concatenating, 95)));
}

#[tokio::test(start_paused = true)]
async fn test_continuity_frame_feeds_later_segments() {
    let p = PipelineBuilder::new(3).build();
    let job = p.orchestrator.submit(request(24)).await.unwrap();
    p.round().await;
    assert_eq!(
        p.store.get(&job.id).await.unwrap().unwrap().status,
        ChainStatus::Completed
    );

    let submissions = p.api.submissions();
    assert_eq!(submissions.len(), 3);
    assert!(submissions[0].input_reference.is_none());
    for later in &submissions[1..] {
        assert_eq!(later.input_reference.as_deref(), Some(FAKE_FRAME_BYTES));
    }
    assert!(submissions.iter().all(|s| s.seconds == 8));

    let extractions = p
        .toolkit
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ToolkitCall::ExtractLastFrame { .. }))
        .count();
    assert_eq!(extractions, 3);
}

#[tokio::test(start_paused = true)]
async fn test_fail_once_then_retry_succeeds() {
    let api = FakeVideoApi::new().with_job_script(2, vec![ScriptedStatus::failed("server_error")]);
    let p = PipelineBuilder::new(2).api(api).build();
    let job = p.orchestrator.submit(request(16)).await.unwrap();

    p.round().await;
    let retried = p.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(retried.status, ChainStatus::Queued);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.segment_job_ids.is_empty());
    assert!(retried.error_message.as_deref().unwrap().contains("Segment 2"));
    assert!(p.notifier.events().is_empty());

    p.round().await;
    let done = p.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, ChainStatus::Completed);
    assert_eq!(done.segment_job_ids, vec!["video_3", "video_4"]);
}

#[tokio::test(start_paused = true)]
async fn test_second_failure_is_permanent() {
    let api = FakeVideoApi::new()
        .with_job_script(1, vec![ScriptedStatus::failed("moderation_blocked")])
        .with_job_script(2, vec![ScriptedStatus::failed("moderation_blocked")]);
    let p = PipelineBuilder::new(2).api(api).build();
    let job = p.orchestrator.submit(request(16)).await.unwrap();

    p.round().await;
    assert_eq!(
        p.store.get(&job.id).await.unwrap().unwrap().status,
        ChainStatus::Queued
    );

    p.round().await;
    let failed = p.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ChainStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Segment 1 generation failed after 1 poll attempts: moderation_blocked")
    );

    let statuses: Vec<ChainStatus> = p.store.history(&job.id).into_iter().map(|(s, _)| s).collect();
    let failures = statuses.iter().filter(|s| **s == ChainStatus::Failed).count();
    assert_eq!(failures, 2);

    let events = p.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, ChainStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_poll_timeout_fails_chain() {
    let api = FakeVideoApi::new()
        .with_script(vec![ScriptedStatus::running(30)])
        .repeat_last();
    let p = PipelineBuilder::new(2)
        .api(api)
        .max_attempts(3)
        .max_auto_retries(0)
        .build();
    let job = p.orchestrator.submit(request(16)).await.unwrap();

    p.round().await;

    let failed = p.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ChainStatus::Failed);
    let message = failed.error_message.unwrap();
    assert!(message.contains("timed out"), "{}", message);
    assert_eq!(p.api.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_codec_mismatch_uses_reencode_fallback() {
    let p = PipelineBuilder::new(2)
        .toolkit(FakeToolkit::new().fail_concat_copy(FakeFailure::CodecMismatch))
        .build();
    let job = p.orchestrator.submit(request(16)).await.unwrap();
    p.round().await;

    assert_eq!(
        p.store.get(&job.id).await.unwrap().unwrap().status,
        ChainStatus::Completed
    );
    let calls = p.toolkit.calls();
    assert!(calls.iter().any(|c| matches!(c, ToolkitCall::ConcatCopy { .. })));
    assert!(calls.iter().any(|c| matches!(c, ToolkitCall::ConcatReencode { .. })));

    let final_video = p.storage.get(&final_video_key(&job.id)).unwrap();
    assert!(final_video.data.starts_with(b"reencoded:"));
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_admits_and_shuts_down() {
    let p = PipelineBuilder::new(2).build();
    let first = p.orchestrator.submit(request(16)).await.unwrap();
    let second = p.orchestrator.submit(request(16)).await.unwrap();

    let runner = {
        let orchestrator = Arc::clone(&p.orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    for _ in 0..600 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let a = p.store.get(&first.id).await.unwrap().unwrap();
        let b = p.store.get(&second.id).await.unwrap().unwrap();
        if a.status == ChainStatus::Completed && b.status == ChainStatus::Completed {
            break;
        }
    }

    p.orchestrator.shutdown();
    runner.await.unwrap().unwrap();

    for id in [&first.id, &second.id] {
        assert_eq!(
            p.store.get(id).await.unwrap().unwrap().status,
            ChainStatus::Completed
        );
    }
}
