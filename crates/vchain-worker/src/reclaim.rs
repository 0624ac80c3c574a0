//! Sweeps work directories left behind by failed chains.
//!
//! A completed chain removes its own directory. A failed one keeps it for
//! inspection until it is older than the retention window.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use vchain_media::fs_utils;
use vchain_models::{ChainId, ChainStatus};
use vchain_store::JobStore;

use crate::config::MIN_RECLAIM_INTERVAL;
use crate::error::WorkerResult;
use crate::metrics;

/// Prefix of every per-chain directory under the work root.
pub const CHAIN_DIR_PREFIX: &str = "chain-";

/// Working directory of one chain.
pub fn chain_work_dir(root: &Path, chain_id: &ChainId) -> PathBuf {
    root.join(format!("{}{}", CHAIN_DIR_PREFIX, chain_id))
}

/// Removes stale failed-chain directories.
pub struct DiskReclaimer {
    store: Arc<dyn JobStore>,
    root: PathBuf,
    retention: Duration,
}

impl DiskReclaimer {
    pub fn new(store: Arc<dyn JobStore>, root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            store,
            root: root.into(),
            retention,
        }
    }

    /// One sweep. Returns the directories removed.
    ///
    /// A directory goes when it is older than the retention window and its
    /// chain is failed or no longer exists. Queued and running chains are
    /// never touched.
    pub async fn sweep(&self) -> WorkerResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_prefix(CHAIN_DIR_PREFIX)) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < self.retention {
                continue;
            }

            let chain_id = ChainId::from(id);
            let reclaimable = match self.store.get(&chain_id).await? {
                None => true,
                Some(job) => job.status == ChainStatus::Failed,
            };
            if !reclaimable {
                debug!(chain_id = %chain_id, "Keeping work directory of live chain");
                continue;
            }

            let path = entry.path();
            if fs_utils::remove_dir_best_effort(&path).await {
                removed.push(path);
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Reclaimed stale work directories");
            metrics::record_work_dirs_reclaimed(removed.len());
        }
        Ok(removed)
    }

    /// Sweep every `interval` until `shutdown` flips to `true`.
    pub async fn run(self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval.max(MIN_RECLAIM_INTERVAL));
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!("Work directory sweep failed: {}", e);
                    }
                }
            }
        }
    }
}
