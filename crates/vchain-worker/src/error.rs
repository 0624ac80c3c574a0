//! Worker error types.

use thiserror::Error;

use vchain_models::{InvalidTransition, ValidationError};

pub type WorkerResult<T> = Result<T, ChainError>;

/// Everything that can stop a chain.
///
/// The first five variants are pipeline stage failures; the rest wrap the
/// lower crates and the worker's own plumbing.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Segment {index} generation failed after {attempts} poll attempts: {message}")]
    SegmentGenerationFailed {
        index: u32,
        attempts: u32,
        message: String,
    },

    #[error("Continuity frame extraction failed for segment {index}: {message}")]
    ContinuityExtractionFailed { index: u32, message: String },

    #[error("Concatenation failed{}: {message}", mismatch_suffix(.codec_mismatch))]
    ConcatenationFailed {
        codec_mismatch: bool,
        message: String,
    },

    #[error("Storage failed: {0}")]
    StorageFailed(#[from] vchain_storage::StorageError),

    #[error("Job store error: {0}")]
    Store(#[from] vchain_store::StoreError),

    #[error("Generation API error: {0}")]
    Api(String),

    #[error("Media error: {0}")]
    Media(#[from] vchain_media::MediaError),

    #[error("Invalid chain: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Chain not found: {0}")]
    NotFound(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn mismatch_suffix(codec_mismatch: &bool) -> &'static str {
    if *codec_mismatch {
        " (codec mismatch)"
    } else {
        ""
    }
}

impl ChainError {
    pub fn planning_failed(msg: impl Into<String>) -> Self {
        Self::PlanningFailed(msg.into())
    }

    pub fn segment_failed(index: u32, attempts: u32, msg: impl Into<String>) -> Self {
        Self::SegmentGenerationFailed {
            index,
            attempts,
            message: msg.into(),
        }
    }

    pub fn continuity_failed(index: u32, msg: impl Into<String>) -> Self {
        Self::ContinuityExtractionFailed {
            index,
            message: msg.into(),
        }
    }

    pub fn api_failed(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }

    /// Map a concat failure, keeping whether the inputs were incompatible.
    pub fn concat_failed(err: &vchain_media::MediaError) -> Self {
        Self::ConcatenationFailed {
            codec_mismatch: err.is_codec_mismatch(),
            message: err.detail(),
        }
    }

    /// Short label for metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            ChainError::PlanningFailed(_) => "planning",
            ChainError::SegmentGenerationFailed { .. } | ChainError::Api(_) => "generation",
            ChainError::ContinuityExtractionFailed { .. } => "continuity",
            ChainError::ConcatenationFailed { .. } | ChainError::Media(_) => "concat",
            ChainError::StorageFailed(_) => "storage",
            ChainError::Store(_) => "store",
            ChainError::Interrupted(_) => "interrupted",
            _ => "other",
        }
    }
}
