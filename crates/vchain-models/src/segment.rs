//! Segment plans and generation results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::video::{Resolution, VideoModel};

/// Minimum prompt length for a planned segment.
pub const MIN_SEGMENT_PROMPT_CHARS: usize = 40;

/// One planned segment of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SegmentPlan {
    /// Short label for the segment
    pub title: String,
    /// Segment length in seconds (always the chain's configured value)
    pub seconds: u32,
    /// Generation directive
    pub prompt: String,
}

/// Runtime record of one generated segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    /// 1-based position in the chain
    pub index: u32,
    /// Job id returned by the generation API
    pub external_job_id: String,
    /// Downloaded clip
    pub video_path: PathBuf,
    /// Still extracted near the end of the clip
    pub last_frame_path: PathBuf,
    /// Thumbnail, when the API provided one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    /// Actual clip duration in seconds
    pub duration: f64,
}

/// Metadata attached to the final chain output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResultMetadata {
    pub size: Resolution,
    pub model: VideoModel,
    pub total_duration: u32,
    pub segment_count: u32,
    pub total_cost: f64,
}

/// Final aggregate produced while finalizing a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResult {
    /// Concatenated video
    pub video_path: PathBuf,
    /// Thumbnail of the final video
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    pub segments: Vec<SegmentResult>,
    pub metadata: ChainResultMetadata,
}

impl ChainResult {
    /// Sum of the actual segment durations.
    pub fn actual_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}
