//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Lowercased stderr fragments that mean the inputs cannot be stream-copied
/// together.
const CODEC_MISMATCH_MARKERS: &[&str] = &[
    "codec parameters",
    "codec mismatch",
    "could not find tag for codec",
    "does not match the corresponding codec",
    "incompatible",
    "non-monotonous dts",
    "different codec",
    "unsupported codec",
];

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Image processing failed: {0}")]
    ImageFailed(String),

    #[error("No input files given")]
    NoInputs,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an image failure error.
    pub fn image_failed(message: impl Into<String>) -> Self {
        Self::ImageFailed(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this failure came from inputs whose codec parameters differ.
    ///
    /// Only FFmpeg failures qualify; IO and lookup errors never do.
    pub fn is_codec_mismatch(&self) -> bool {
        match self {
            MediaError::FfmpegFailed {
                message, stderr, ..
            } => {
                let text = format!("{} {}", message, stderr.as_deref().unwrap_or_default())
                    .to_lowercase();
                CODEC_MISMATCH_MARKERS.iter().any(|m| text.contains(m))
            }
            _ => false,
        }
    }

    /// Message with the tail of FFmpeg's stderr appended.
    pub fn detail(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                message,
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => format!("{}: {}", message, stderr.trim()),
            other => other.to_string(),
        }
    }
}
