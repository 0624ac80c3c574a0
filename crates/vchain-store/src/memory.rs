//! In-memory job store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use vchain_models::{ChainId, ChainJob, ChainStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::JobStore;

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<ChainId, ChainJob>,
    history: HashMap<ChainId, Vec<(ChainStatus, u8)>>,
}

/// [`JobStore`] kept in process memory.
///
/// Every write is also appended to a per-chain history of
/// `(status, progress)` pairs so tests can inspect what was persisted.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(status, progress)` written for `id`, in order.
    pub fn history(&self, id: &ChainId) -> Vec<(ChainStatus, u8)> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.history.get(id).cloned())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &ChainJob) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        inner
            .history
            .entry(job.id.clone())
            .or_default()
            .push((job.status, job.progress));
        Ok(())
    }

    async fn get(&self, id: &ChainId) -> StoreResult<Option<ChainJob>> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.jobs.get(id).cloned())
    }

    async fn update(&self, job: &ChainJob) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        match inner.jobs.get_mut(&job.id) {
            Some(existing) => *existing = job.clone(),
            None => return Err(StoreError::not_found(&job.id)),
        }
        inner
            .history
            .entry(job.id.clone())
            .or_default()
            .push((job.status, job.progress));
        Ok(())
    }

    async fn delete(&self, id: &ChainId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.jobs.remove(id).is_some())
    }

    async fn list_by_status(&self, status: ChainStatus) -> StoreResult<Vec<ChainJob>> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let mut jobs: Vec<ChainJob> = inner
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}
