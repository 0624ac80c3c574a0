//! Job persistence seam.

use async_trait::async_trait;
use vchain_models::{ChainId, ChainJob, ChainStatus};

use crate::error::StoreResult;

/// Persistent chain rows.
///
/// `update` replaces the whole row; status and message therefore always
/// land together.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new chain. Fails if the id is taken.
    async fn create(&self, job: &ChainJob) -> StoreResult<()>;

    /// Load a chain.
    async fn get(&self, id: &ChainId) -> StoreResult<Option<ChainJob>>;

    /// Overwrite an existing chain. Fails if it does not exist.
    async fn update(&self, job: &ChainJob) -> StoreResult<()>;

    /// Remove a chain. Returns whether it existed.
    async fn delete(&self, id: &ChainId) -> StoreResult<bool>;

    /// All chains currently in `status`, oldest first.
    async fn list_by_status(&self, status: ChainStatus) -> StoreResult<Vec<ChainJob>>;
}
