//! Filesystem helpers for chain working directories.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Copy `src` to `dst` byte-for-byte.
///
/// The copy goes to a temporary sibling of `dst` first and is then renamed,
/// so readers never observe a half-written destination.
pub async fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }

    // Create parent directory if needed
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy file: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    fs::rename(&tmp_dst, dst).await.map_err(|e| {
        // Clean up temp file on failure
        let _ = std::fs::remove_file(&tmp_dst);
        MediaError::from(e)
    })?;

    Ok(())
}

/// Remove a directory tree, logging instead of failing.
///
/// Returns whether the directory is gone afterwards.
pub async fn remove_dir_best_effort(dir: impl AsRef<Path>) -> bool {
    let dir = dir.as_ref();
    match fs::remove_dir_all(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove directory {}: {}", dir.display(), e);
            false
        }
    }
}

/// Ensure a file exists and is not empty.
pub async fn ensure_non_empty(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();
    let meta = fs::metadata(path)
        .await
        .map_err(|_| MediaError::FileNotFound(path.to_path_buf()))?;
    if meta.len() == 0 {
        return Err(MediaError::InvalidVideo(format!(
            "{} is empty",
            path.display()
        )));
    }
    Ok(meta.len())
}
