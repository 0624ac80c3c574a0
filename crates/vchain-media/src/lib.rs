#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for chained video generation.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Last-frame extraction for segment continuity
//! - Ordered concatenation with a re-encode fallback on codec mismatch
//! - Frame resizing for image input references

pub mod command;
pub mod concat;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod frame;
pub mod fs_utils;
pub mod probe;
pub mod resize;
pub mod toolkit;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use concat::{ConcatOutcome, ConcatStrategy, Concatenator};
pub use error::{MediaError, MediaResult};
#[cfg(any(test, feature = "test-util"))]
pub use fake::{FakeFailure, FakeToolkit, ToolkitCall};
pub use frame::FrameExtractor;
pub use probe::{probe_video, VideoInfo};
pub use resize::{FrameResizer, ImageResizer};
pub use toolkit::{FfmpegToolkit, MediaToolkit, ReencodeProfile};
