//! Shared data models for the chained video pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Chain jobs, their status machine and creation requests
//! - Segment plans and per-segment results
//! - Generation models, resolutions and resolution tiers
//! - Cost accounting for planned segments

pub mod chain;
pub mod cost;
pub mod segment;
pub mod video;

// Re-export common types
pub use chain::{
    adjusted_total_duration, derive_num_segments, ChainId, ChainJob, ChainRequest, ChainStatus,
    InvalidTransition, ValidationError, ALLOWED_SECONDS_PER_SEGMENT, MIN_BASE_PROMPT_CHARS,
    MIN_SEGMENTS,
};
pub use cost::{chain_cost, segment_cost, CostBreakdown, CostLine, CostQuote, BILLING_BASIS};
pub use segment::{ChainResult, ChainResultMetadata, SegmentPlan, SegmentResult, MIN_SEGMENT_PROMPT_CHARS};
pub use video::{Resolution, ResolutionTier, VideoModel};
