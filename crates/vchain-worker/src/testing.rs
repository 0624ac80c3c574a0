//! Scripted fakes for the worker's external seams.
//!
//! Used by the unit tests here and by the integration tests under `tests/`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use vchain_media::{FrameResizer, MediaResult};

use crate::error::{ChainError, WorkerResult};
use crate::generator::SegmentObserver;
use crate::llm::PlanningLlm;
use crate::notifier::{ChainEvent, ChainNotifier};
use crate::video_api::{
    ArtifactVariant, GenerationRequest, VideoGenerationApi, VideoJobState, VideoJobStatus,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One scripted answer to a status query.
#[derive(Debug, Clone)]
pub enum ScriptedStatus {
    Status(VideoJobStatus),
    /// Transport-level failure
    Error(String),
}

impl ScriptedStatus {
    pub fn running(progress: u8) -> Self {
        Self::Status(VideoJobStatus {
            state: VideoJobState::Running,
            progress,
            error: None,
        })
    }

    pub fn completed() -> Self {
        Self::Status(VideoJobStatus {
            state: VideoJobState::Completed,
            progress: 100,
            error: None,
        })
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Status(VideoJobStatus {
            state: VideoJobState::Failed,
            progress: 0,
            error: Some(message.into()),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

#[derive(Debug, Default)]
struct FakeVideoState {
    submissions: Vec<GenerationRequest>,
    cursors: HashMap<String, usize>,
    scripts: HashMap<String, Vec<ScriptedStatus>>,
    status_calls: u32,
}

/// Generation API that answers from scripts.
///
/// Jobs are numbered in submit order across the fake's lifetime
/// (`video_1`, `video_2`, ...). Each job walks the default script unless
/// one was set for its number. Past the end of a script the job reports
/// completed, or repeats the last entry after [`FakeVideoApi::repeat_last`].
#[derive(Debug)]
pub struct FakeVideoApi {
    state: Mutex<FakeVideoState>,
    script: Vec<ScriptedStatus>,
    job_scripts: HashMap<usize, Vec<ScriptedStatus>>,
    repeat_last: bool,
    thumbnails: bool,
    failing_submits: Vec<usize>,
}

impl Default for FakeVideoApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVideoApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeVideoState::default()),
            script: vec![ScriptedStatus::running(50), ScriptedStatus::completed()],
            job_scripts: HashMap::new(),
            repeat_last: false,
            thumbnails: true,
            failing_submits: Vec::new(),
        }
    }

    pub fn with_script(mut self, script: Vec<ScriptedStatus>) -> Self {
        self.script = script;
        self
    }

    /// Script for the `n`th submitted job (1-based).
    pub fn with_job_script(mut self, n: usize, script: Vec<ScriptedStatus>) -> Self {
        self.job_scripts.insert(n, script);
        self
    }

    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn without_thumbnails(mut self) -> Self {
        self.thumbnails = false;
        self
    }

    /// Reject the `n`th submission (1-based).
    pub fn fail_submit(mut self, n: usize) -> Self {
        self.failing_submits.push(n);
        self
    }

    pub fn submissions(&self) -> Vec<GenerationRequest> {
        lock(&self.state).submissions.clone()
    }

    pub fn status_calls(&self) -> u32 {
        lock(&self.state).status_calls
    }

    /// Body the fake serves for a job's video.
    pub fn video_bytes(job_id: &str) -> Vec<u8> {
        format!("clip:{};", job_id).into_bytes()
    }
}

#[async_trait]
impl VideoGenerationApi for FakeVideoApi {
    async fn submit(&self, request: &GenerationRequest) -> WorkerResult<String> {
        let mut state = lock(&self.state);
        state.submissions.push(request.clone());
        let n = state.submissions.len();
        if self.failing_submits.contains(&n) {
            return Err(ChainError::api_failed("Video API returned 400: invalid request"));
        }
        let job_id = format!("video_{}", n);
        let script = self
            .job_scripts
            .get(&n)
            .cloned()
            .unwrap_or_else(|| self.script.clone());
        state.scripts.insert(job_id.clone(), script);
        state.cursors.insert(job_id.clone(), 0);
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> WorkerResult<VideoJobStatus> {
        let mut state = lock(&self.state);
        state.status_calls += 1;
        let script = state
            .scripts
            .get(job_id)
            .cloned()
            .ok_or_else(|| ChainError::api_failed(format!("unknown job {}", job_id)))?;
        let cursor = state.cursors.entry(job_id.to_string()).or_insert(0);
        let entry = match script.get(*cursor) {
            Some(entry) => Some(entry.clone()),
            None if self.repeat_last => script.last().cloned(),
            None => None,
        };
        *cursor += 1;

        match entry {
            Some(ScriptedStatus::Status(status)) => Ok(status),
            Some(ScriptedStatus::Error(message)) => Err(ChainError::api_failed(message)),
            None => Ok(VideoJobStatus {
                state: VideoJobState::Completed,
                progress: 100,
                error: None,
            }),
        }
    }

    async fn download(&self, job_id: &str, variant: ArtifactVariant) -> WorkerResult<Vec<u8>> {
        match variant {
            ArtifactVariant::Video => Ok(Self::video_bytes(job_id)),
            ArtifactVariant::Thumbnail if self.thumbnails => {
                Ok(format!("thumb:{}", job_id).into_bytes())
            }
            ArtifactVariant::Thumbnail => Err(ChainError::api_failed("Video API returned 404")),
        }
    }
}

/// Planning LLM that replays canned responses.
///
/// The last response repeats once the list is used up.
#[derive(Debug)]
pub struct ScriptedLlm {
    responses: Vec<Result<String, String>>,
    calls: Mutex<usize>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses,
            calls: Mutex::new(0),
        }
    }

    /// Always answer with a valid plan of `n` segments.
    pub fn with_plan(n: u32) -> Self {
        Self::new(vec![Ok(Self::plan_json(n))])
    }

    /// A well-formed `{"segments": [...]}` answer.
    pub fn plan_json(n: u32) -> String {
        let segments: Vec<serde_json::Value> = (1..=n)
            .map(|i| {
                serde_json::json!({
                    "title": format!("Beat {}", i),
                    "seconds": 8,
                    "prompt": format!(
                        "Beat {}: the camera keeps drifting along the shoreline as the light warms and the tide rolls in",
                        i
                    ),
                })
            })
            .collect();
        serde_json::json!({ "segments": segments }).to_string()
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl PlanningLlm for ScriptedLlm {
    async fn complete(&self, _system: &str, _user: &str) -> WorkerResult<String> {
        let n = {
            let mut calls = lock(&self.calls);
            *calls += 1;
            *calls
        };
        let response = self
            .responses
            .get(n - 1)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_else(|| Err("no scripted response".to_string()));
        response.map_err(ChainError::api_failed)
    }
}

/// Collects notifications.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ChainEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<ChainEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl ChainNotifier for RecordingNotifier {
    async fn notify(&self, event: &ChainEvent) -> WorkerResult<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// Collects generator callbacks.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    submitted: Mutex<Vec<(u32, String)>>,
    progress: Mutex<Vec<u8>>,
}

impl RecordingObserver {
    pub fn submitted(&self) -> Vec<(u32, String)> {
        lock(&self.submitted).clone()
    }

    pub fn progress(&self) -> Vec<u8> {
        lock(&self.progress).clone()
    }
}

#[async_trait]
impl SegmentObserver for RecordingObserver {
    async fn on_submitted(&self, index: u32, external_job_id: &str) -> WorkerResult<()> {
        lock(&self.submitted).push((index, external_job_id.to_string()));
        Ok(())
    }

    async fn on_progress(&self, chain_progress: u8) -> WorkerResult<()> {
        lock(&self.progress).push(chain_progress);
        Ok(())
    }
}

/// Resizer that returns its input and records the requested sizes.
#[derive(Debug, Default)]
pub struct RecordingResizer {
    requests: Mutex<Vec<(u32, u32)>>,
}

impl RecordingResizer {
    pub fn requests(&self) -> Vec<(u32, u32)> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl FrameResizer for RecordingResizer {
    async fn resize(&self, bytes: Vec<u8>, width: u32, height: u32) -> MediaResult<Vec<u8>> {
        lock(&self.requests).push((width, height));
        Ok(bytes)
    }
}
