//! Chain job definitions and the chain status machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::segment::SegmentPlan;
use crate::video::{Resolution, VideoModel};

/// Minimum length of a chain's base prompt (after trimming).
pub const MIN_BASE_PROMPT_CHARS: usize = 20;
/// Segment lengths the generation API accepts.
pub const ALLOWED_SECONDS_PER_SEGMENT: &[u32] = &[4, 8, 12];
/// A chain needs at least two links.
pub const MIN_SEGMENTS: u32 = 2;

/// Unique identifier for a chain job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl ChainId {
    /// Generate a new random chain ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pipeline status of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// Waiting for the orchestrator to admit it
    #[default]
    Queued,
    /// Segment prompts are being planned
    Planning,
    /// Segments are being generated one after another
    Generating,
    /// Segment clips are being joined and uploaded
    Concatenating,
    /// Final video is available
    Completed,
    /// Pipeline failed
    Failed,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Queued => "queued",
            ChainStatus::Planning => "planning",
            ChainStatus::Generating => "generating",
            ChainStatus::Concatenating => "concatenating",
            ChainStatus::Completed => "completed",
            ChainStatus::Failed => "failed",
        }
    }

    pub fn all() -> &'static [ChainStatus] {
        &[
            ChainStatus::Queued,
            ChainStatus::Planning,
            ChainStatus::Generating,
            ChainStatus::Concatenating,
            ChainStatus::Completed,
            ChainStatus::Failed,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainStatus::Completed | ChainStatus::Failed)
    }

    /// Whether the orchestrator is actively working on a chain in this state.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ChainStatus::Planning | ChainStatus::Generating | ChainStatus::Concatenating
        )
    }

    /// Check whether `next` is a legal successor of this state.
    ///
    /// Forward moves follow the pipeline order one step at a time, any
    /// non-terminal state may fail, and `failed -> queued` is the only
    /// backwards edge.
    pub fn can_transition_to(&self, next: ChainStatus) -> bool {
        use ChainStatus::*;
        matches!(
            (self, next),
            (Queued, Planning)
                | (Planning, Generating)
                | (Generating, Concatenating)
                | (Concatenating, Completed)
                | (Queued | Planning | Generating | Concatenating, Failed)
                | (Failed, Queued)
        )
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid chain transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ChainStatus,
    pub to: ChainStatus,
}

/// Reasons a chain request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("base prompt must be at least {min} characters (got {actual})")]
    PromptTooShort { min: usize, actual: usize },

    #[error("seconds per segment must be one of {allowed:?} (got {actual})")]
    UnsupportedSegmentLength { allowed: &'static [u32], actual: u32 },

    #[error("total duration {total}s yields {segments} segment(s) of {seconds_per_segment}s; at least {min} are required")]
    TooFewSegments {
        total: u32,
        seconds_per_segment: u32,
        segments: u32,
        min: u32,
    },

    #[error("invalid size: {0}")]
    InvalidSize(String),
}

/// Derive the segment count for a requested duration.
///
/// The requested total is rounded down to a whole number of segments.
pub fn derive_num_segments(total_duration: u32, seconds_per_segment: u32) -> Result<u32, ValidationError> {
    if !ALLOWED_SECONDS_PER_SEGMENT.contains(&seconds_per_segment) {
        return Err(ValidationError::UnsupportedSegmentLength {
            allowed: ALLOWED_SECONDS_PER_SEGMENT,
            actual: seconds_per_segment,
        });
    }
    let segments = total_duration / seconds_per_segment;
    if segments < MIN_SEGMENTS {
        return Err(ValidationError::TooFewSegments {
            total: total_duration,
            seconds_per_segment,
            segments,
            min: MIN_SEGMENTS,
        });
    }
    Ok(segments)
}

/// Total duration actually produced for a requested duration.
///
/// Idempotent: feeding the result back in returns the same value.
pub fn adjusted_total_duration(total_duration: u32, seconds_per_segment: u32) -> u32 {
    if seconds_per_segment == 0 {
        return 0;
    }
    (total_duration / seconds_per_segment) * seconds_per_segment
}

/// Input used to create a chain.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChainRequest {
    pub base_prompt: String,
    pub total_duration: u32,
    pub seconds_per_segment: u32,
    #[serde(default)]
    pub model: VideoModel,
    pub size: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A user-visible request to produce one chained video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChainJob {
    /// Unique chain ID
    pub id: ChainId,

    /// Owner, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub base_prompt: String,
    /// Always `num_segments * seconds_per_segment`
    pub total_duration: u32,
    pub seconds_per_segment: u32,
    pub num_segments: u32,
    pub model: VideoModel,
    /// Output size as `WxH`
    pub size: String,

    #[serde(default)]
    pub status: ChainStatus,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Serialized `Vec<SegmentPlan>`, set once after planning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_json: Option<String>,

    /// External generation job ids, in segment order
    #[serde(default)]
    pub segment_job_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_video_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    /// Serialized cost breakdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_details: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Automatic retries consumed so far
    #[serde(default)]
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainJob {
    /// Validate a request and build a queued chain from it.
    pub fn from_request(request: ChainRequest) -> Result<Self, ValidationError> {
        let prompt = request.base_prompt.trim().to_string();
        let prompt_len = prompt.chars().count();
        if prompt_len < MIN_BASE_PROMPT_CHARS {
            return Err(ValidationError::PromptTooShort {
                min: MIN_BASE_PROMPT_CHARS,
                actual: prompt_len,
            });
        }

        let num_segments = derive_num_segments(request.total_duration, request.seconds_per_segment)?;

        let resolution: Resolution = request
            .size
            .parse()
            .map_err(ValidationError::InvalidSize)?;

        let now = Utc::now();
        Ok(Self {
            id: ChainId::new(),
            user_id: request.user_id,
            base_prompt: prompt,
            total_duration: num_segments * request.seconds_per_segment,
            seconds_per_segment: request.seconds_per_segment,
            num_segments,
            model: request.model,
            size: resolution.to_size_string(),
            status: ChainStatus::Queued,
            progress: 0,
            plan_json: None,
            segment_job_ids: Vec::new(),
            final_video_url: None,
            thumbnail_url: None,
            cost_details: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Parsed output resolution.
    pub fn resolution(&self) -> Result<Resolution, ValidationError> {
        self.size.parse().map_err(ValidationError::InvalidSize)
    }

    /// Move to `next`, bumping `updated_at`.
    pub fn transition(&mut self, next: ChainStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark failed with a message in one step.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(ChainStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Set progress, capped at 100.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        self.updated_at = Utc::now();
    }

    /// Store the plan. Only the first call has any effect.
    pub fn set_plan(&mut self, plan: &[SegmentPlan]) -> Result<bool, serde_json::Error> {
        if self.plan_json.is_some() {
            return Ok(false);
        }
        self.plan_json = Some(serde_json::to_string(plan)?);
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Decode the stored plan, if any.
    pub fn plan(&self) -> Option<Result<Vec<SegmentPlan>, serde_json::Error>> {
        self.plan_json.as_deref().map(serde_json::from_str)
    }

    /// Record an external job id. Returns `false` once every segment has one.
    pub fn push_segment_job_id(&mut self, job_id: impl Into<String>) -> bool {
        if self.segment_job_ids.len() >= self.num_segments as usize {
            return false;
        }
        self.segment_job_ids.push(job_id.into());
        self.updated_at = Utc::now();
        true
    }

    /// Clear pipeline output so a retried run starts from planning again.
    pub fn reset_pipeline_state(&mut self) {
        self.progress = 0;
        self.plan_json = None;
        self.segment_job_ids.clear();
        self.final_video_url = None;
        self.thumbnail_url = None;
        self.cost_details = None;
        self.updated_at = Utc::now();
    }

    /// Check the duration/segment invariants.
    pub fn is_consistent(&self) -> bool {
        self.num_segments * self.seconds_per_segment == self.total_duration
            && self.segment_job_ids.len() <= self.num_segments as usize
    }
}
