//! In-memory [`MediaToolkit`] for tests.
//!
//! Writes deterministic placeholder files instead of running FFmpeg and
//! records every call so tests can assert on the strategy taken.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils;
use crate::toolkit::MediaToolkit;

/// Placeholder JPEG body (SOI marker + padding + EOI marker).
pub const FAKE_FRAME_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x00, 0xFF, 0xD9];

/// A recorded toolkit invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolkitCall {
    ExtractLastFrame { video: PathBuf },
    ConcatCopy { inputs: Vec<PathBuf> },
    ConcatReencode { inputs: Vec<PathBuf> },
    CopyFile { src: PathBuf },
    Duration { video: PathBuf },
}

/// Failure to inject into a fake operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    /// FFmpeg-style failure whose stderr reads like a codec mismatch
    CodecMismatch,
    /// FFmpeg-style failure unrelated to codecs
    Other,
}

impl FakeFailure {
    fn to_error(self) -> MediaError {
        match self {
            FakeFailure::CodecMismatch => MediaError::ffmpeg_failed(
                "Concat failed",
                Some("[mp4 @ 0x0] Could not find tag for codec pcm_s16le in stream #1".to_string()),
                Some(1),
            ),
            FakeFailure::Other => MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some("Invalid data found when processing input".to_string()),
                Some(1),
            ),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<ToolkitCall>,
}

/// Recording fake toolkit.
#[derive(Debug)]
pub struct FakeToolkit {
    state: Mutex<FakeState>,
    segment_duration: f64,
    empty_frames: bool,
    extract_failure: Option<FakeFailure>,
    concat_copy_failure: Option<FakeFailure>,
    concat_reencode_failure: Option<FakeFailure>,
}

impl Default for FakeToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeToolkit {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            segment_duration: 8.0,
            empty_frames: false,
            extract_failure: None,
            concat_copy_failure: None,
            concat_reencode_failure: None,
        }
    }

    /// Duration reported for every clip.
    pub fn with_segment_duration(mut self, seconds: f64) -> Self {
        self.segment_duration = seconds;
        self
    }

    /// Write zero-byte frames, as a decoder that produced nothing would.
    pub fn with_empty_frames(mut self) -> Self {
        self.empty_frames = true;
        self
    }

    pub fn fail_extract(mut self, failure: FakeFailure) -> Self {
        self.extract_failure = Some(failure);
        self
    }

    pub fn fail_concat_copy(mut self, failure: FakeFailure) -> Self {
        self.concat_copy_failure = Some(failure);
        self
    }

    pub fn fail_concat_reencode(mut self, failure: FakeFailure) -> Self {
        self.concat_reencode_failure = Some(failure);
        self
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<ToolkitCall> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: ToolkitCall) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push(call);
        }
    }

    async fn join_inputs(inputs: &[PathBuf], prefix: &[u8], output: &Path) -> MediaResult<()> {
        let mut body = prefix.to_vec();
        for input in inputs {
            body.extend(tokio::fs::read(input).await?);
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, body).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn extract_last_frame(&self, video: &Path, output: &Path) -> MediaResult<()> {
        self.record(ToolkitCall::ExtractLastFrame {
            video: video.to_path_buf(),
        });
        if let Some(failure) = self.extract_failure {
            return Err(failure.to_error());
        }
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        let body: &[u8] = if self.empty_frames { &[] } else { FAKE_FRAME_BYTES };
        tokio::fs::write(output, body).await?;
        Ok(())
    }

    async fn concat_copy(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        self.record(ToolkitCall::ConcatCopy {
            inputs: inputs.to_vec(),
        });
        if inputs.is_empty() {
            return Err(MediaError::NoInputs);
        }
        if let Some(failure) = self.concat_copy_failure {
            return Err(failure.to_error());
        }
        Self::join_inputs(inputs, b"", output).await
    }

    async fn concat_reencode(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        self.record(ToolkitCall::ConcatReencode {
            inputs: inputs.to_vec(),
        });
        if inputs.is_empty() {
            return Err(MediaError::NoInputs);
        }
        if let Some(failure) = self.concat_reencode_failure {
            return Err(failure.to_error());
        }
        Self::join_inputs(inputs, b"reencoded:", output).await
    }

    async fn duration(&self, video: &Path) -> MediaResult<f64> {
        self.record(ToolkitCall::Duration {
            video: video.to_path_buf(),
        });
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        Ok(self.segment_duration)
    }

    async fn copy_file(&self, src: &Path, dst: &Path) -> MediaResult<()> {
        self.record(ToolkitCall::CopyFile {
            src: src.to_path_buf(),
        });
        fs_utils::copy_file(src, dst).await
    }
}
