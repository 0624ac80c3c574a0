//! Continuity frame extraction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils;
use crate::toolkit::MediaToolkit;

/// Pulls the last decodable frame out of a generated clip so the next
/// segment can start from it.
#[derive(Clone)]
pub struct FrameExtractor {
    toolkit: Arc<dyn MediaToolkit>,
}

impl FrameExtractor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }

    /// Path the frame for `video` is written to (`seg-01.mp4` -> `seg-01.last.jpg`).
    pub fn frame_path_for(video: &Path) -> PathBuf {
        video.with_extension("last.jpg")
    }

    /// Extract the last frame of `video` next to it and return the JPEG path.
    ///
    /// Any failure is fatal for the chain: without the frame the next
    /// segment would lose continuity.
    pub async fn extract_last_frame(&self, video: &Path) -> MediaResult<PathBuf> {
        fs_utils::ensure_non_empty(video).await?;

        let output = Self::frame_path_for(video);
        if let Err(e) = self.toolkit.extract_last_frame(video, &output).await {
            warn!(video = %video.display(), "Last-frame extraction failed: {}", e.detail());
            return Err(e);
        }

        let size = fs_utils::ensure_non_empty(&output).await.map_err(|_| {
            MediaError::InvalidVideo(format!(
                "no frame decoded from {}",
                video.display()
            ))
        })?;

        debug!(video = %video.display(), frame = %output.display(), bytes = size, "Extracted continuity frame");
        Ok(output)
    }
}
