//! One segment's lifecycle: reference frame, submit, poll, download,
//! continuity frame.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vchain_media::{FrameExtractor, FrameResizer, MediaToolkit};
use vchain_models::{Resolution, SegmentPlan, SegmentResult, VideoModel};

use crate::config::PollConfig;
use crate::error::{ChainError, WorkerResult};
use crate::metrics;
use crate::poll::{PollTicker, Tick};
use crate::video_api::{ArtifactVariant, GenerationRequest, VideoGenerationApi, VideoJobState};

/// Settings shared by every segment of a chain.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: VideoModel,
    pub size: Resolution,
    pub poll: PollConfig,
}

/// One segment to generate.
#[derive(Debug, Clone, Copy)]
pub struct SegmentTask<'a> {
    pub plan: &'a SegmentPlan,
    /// 1-based
    pub index: u32,
    pub total: u32,
    /// Last frame of the previous segment
    pub previous_frame: Option<&'a Path>,
    /// Where the clip and its frames are written
    pub output_dir: &'a Path,
}

/// Receives bookkeeping events while a segment is generated.
#[async_trait]
pub trait SegmentObserver: Send + Sync {
    /// The provider accepted the request.
    async fn on_submitted(&self, index: u32, external_job_id: &str) -> WorkerResult<()>;

    /// Chain-level progress after a poll tick.
    async fn on_progress(&self, chain_progress: u8) -> WorkerResult<()>;
}

/// Chain progress for segment `index` (1-based) at `segment_progress` percent.
///
/// `floor(((completed + segment_progress / 100) / total) * 100)`, computed
/// in integers.
pub fn chain_progress(index: u32, total: u32, segment_progress: u8) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = index.saturating_sub(1).min(total) as u64;
    let seg = segment_progress.min(100) as u64;
    ((completed * 100 + seg) / total as u64).min(100) as u8
}

/// Generates segments one at a time, threading the last frame forward.
#[derive(Clone)]
pub struct ContinuitySegmentGenerator {
    api: Arc<dyn VideoGenerationApi>,
    resizer: Arc<dyn FrameResizer>,
    toolkit: Arc<dyn MediaToolkit>,
    frames: FrameExtractor,
    cancel: Option<watch::Receiver<bool>>,
}

impl ContinuitySegmentGenerator {
    pub fn new(
        api: Arc<dyn VideoGenerationApi>,
        resizer: Arc<dyn FrameResizer>,
        toolkit: Arc<dyn MediaToolkit>,
    ) -> Self {
        Self {
            api,
            resizer,
            frames: FrameExtractor::new(Arc::clone(&toolkit)),
            toolkit,
            cancel: None,
        }
    }

    /// Abort polling when `cancel` becomes `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn video_path(output_dir: &Path, index: u32) -> PathBuf {
        output_dir.join(format!("seg-{:02}.mp4", index))
    }

    pub fn thumbnail_path(output_dir: &Path, index: u32) -> PathBuf {
        output_dir.join(format!("seg-{:02}.thumb.jpg", index))
    }

    /// Build the image input reference from the previous segment's frame.
    async fn input_reference(&self, task: &SegmentTask<'_>, size: Resolution) -> WorkerResult<Option<Vec<u8>>> {
        let Some(frame) = task.previous_frame else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(frame).await.map_err(|e| {
            ChainError::continuity_failed(
                task.index,
                format!("cannot read previous frame {}: {}", frame.display(), e),
            )
        })?;
        let resized = self
            .resizer
            .resize(bytes, size.width, size.height)
            .await
            .map_err(|e| ChainError::continuity_failed(task.index, e.detail()))?;
        Ok(Some(resized))
    }

    /// Run one segment to completion.
    pub async fn generate(
        &self,
        task: SegmentTask<'_>,
        config: &GenerationConfig,
        observer: &dyn SegmentObserver,
    ) -> WorkerResult<SegmentResult> {
        let index = task.index;
        let input_reference = self.input_reference(&task, config.size).await?;

        let request = GenerationRequest {
            prompt: task.plan.prompt.clone(),
            model: config.model,
            size: config.size,
            seconds: task.plan.seconds,
            input_reference,
        };
        let job_id = self.api.submit(&request).await.map_err(|e| {
            ChainError::segment_failed(index, 0, format!("submit failed: {}", e))
        })?;
        info!(
            segment = index,
            total = task.total,
            external_job_id = %job_id,
            with_reference = request.input_reference.is_some(),
            "Segment submitted"
        );
        observer.on_submitted(index, &job_id).await?;

        let attempts = self.poll_until_complete(&task, &job_id, config, observer).await?;

        tokio::fs::create_dir_all(task.output_dir).await?;
        let video_path = Self::video_path(task.output_dir, index);
        let video = self
            .api
            .download(&job_id, ArtifactVariant::Video)
            .await
            .map_err(|e| ChainError::segment_failed(index, attempts, format!("download failed: {}", e)))?;
        tokio::fs::write(&video_path, video).await?;

        let thumbnail_path = self.download_thumbnail(task.output_dir, index, &job_id).await;

        let last_frame_path = self
            .frames
            .extract_last_frame(&video_path)
            .await
            .map_err(|e| ChainError::continuity_failed(index, e.detail()))?;

        let duration = match self.toolkit.duration(&video_path).await {
            Ok(d) if d > 0.0 => d,
            Ok(_) | Err(_) => {
                debug!(segment = index, "Duration unavailable, using planned length");
                task.plan.seconds as f64
            }
        };

        metrics::record_segment_generated(config.model.as_str(), attempts);
        info!(segment = index, attempts, duration, "Segment generated");

        Ok(SegmentResult {
            index,
            external_job_id: job_id,
            video_path,
            last_frame_path,
            thumbnail_path,
            duration,
        })
    }

    /// Poll until the provider reports a terminal state.
    ///
    /// Returns the number of status queries made.
    async fn poll_until_complete(
        &self,
        task: &SegmentTask<'_>,
        job_id: &str,
        config: &GenerationConfig,
        observer: &dyn SegmentObserver,
    ) -> WorkerResult<u32> {
        let index = task.index;
        let mut ticker = PollTicker::new(config.poll.clone());
        if let Some(cancel) = &self.cancel {
            ticker = ticker.with_cancel(cancel.clone());
        }

        loop {
            let attempt = match ticker.tick().await {
                Tick::Ready { attempt } => attempt,
                Tick::Exhausted { attempts } => {
                    return Err(ChainError::segment_failed(
                        index,
                        attempts,
                        format!(
                            "timed out waiting for generation job {} to finish",
                            job_id
                        ),
                    ));
                }
                Tick::Cancelled => {
                    return Err(ChainError::Interrupted(format!(
                        "segment {} polling cancelled",
                        index
                    )));
                }
            };

            let status = match self.api.status(job_id).await {
                Ok(status) => status,
                Err(e) => {
                    metrics::record_poll_error();
                    warn!(segment = index, attempt, "Status query failed: {}", e);
                    continue;
                }
            };

            let progress = if status.state == VideoJobState::Completed {
                100
            } else {
                status.progress
            };
            observer
                .on_progress(chain_progress(index, task.total, progress))
                .await?;
            debug!(segment = index, attempt, state = ?status.state, progress, "Polled segment");

            match status.state {
                VideoJobState::Completed => return Ok(attempt),
                VideoJobState::Failed => {
                    return Err(ChainError::segment_failed(
                        index,
                        attempt,
                        status
                            .error
                            .unwrap_or_else(|| "generation failed without a message".to_string()),
                    ));
                }
                VideoJobState::Pending | VideoJobState::Running => {}
            }
        }
    }

    /// Fetch the provider thumbnail; failures are logged and ignored.
    async fn download_thumbnail(&self, output_dir: &Path, index: u32, job_id: &str) -> Option<PathBuf> {
        let bytes = match self.api.download(job_id, ArtifactVariant::Thumbnail).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(segment = index, "Thumbnail unavailable: {}", e);
                return None;
            }
        };
        let path = Self::thumbnail_path(output_dir, index);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(segment = index, "Failed to save thumbnail: {}", e);
                None
            }
        }
    }
}
