//! Redis-backed job store.
//!
//! Each chain is a JSON string at `{prefix}:chain:{id}`; a set per status at
//! `{prefix}:status:{status}` indexes ids for `list_by_status`.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};
use vchain_models::{ChainId, ChainJob, ChainStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::JobStore;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key namespace
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vchain".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX")
                .unwrap_or_else(|_| "vchain".to_string()),
        }
    }
}

/// [`JobStore`] on Redis.
pub struct RedisJobStore {
    client: redis::Client,
    config: StoreConfig,
}

impl RedisJobStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    /// Round-trip a PING to verify connectivity.
    pub async fn check_connectivity(&self) -> StoreResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    pub fn chain_key(&self, id: &ChainId) -> String {
        format!("{}:chain:{}", self.config.key_prefix, id)
    }

    pub fn status_key(&self, status: ChainStatus) -> String {
        format!("{}:status:{}", self.config.key_prefix, status.as_str())
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &ChainId,
    ) -> StoreResult<Option<ChainJob>> {
        let raw: Option<String> = conn.get(self.chain_key(id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: &ChainJob) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;

        let inserted: bool = conn.set_nx(self.chain_key(&job.id), payload).await?;
        if !inserted {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        conn.sadd::<_, _, ()>(self.status_key(job.status), job.id.as_str())
            .await?;

        debug!(chain_id = %job.id, "Created chain row");
        Ok(())
    }

    async fn get(&self, id: &ChainId) -> StoreResult<Option<ChainJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.load(&mut conn, id).await
    }

    async fn update(&self, job: &ChainJob) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let previous = self
            .load(&mut conn, &job.id)
            .await?
            .ok_or_else(|| StoreError::not_found(&job.id))?;
        let payload = serde_json::to_string(job)?;

        let mut pipe = redis::pipe();
        pipe.atomic().set(self.chain_key(&job.id), payload).ignore();
        if previous.status != job.status {
            pipe.srem(self.status_key(previous.status), job.id.as_str())
                .ignore()
                .sadd(self.status_key(job.status), job.id.as_str())
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, id: &ChainId) -> StoreResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let existing = self.load(&mut conn, id).await?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(self.chain_key(id)).ignore();
        // The status is unknown for corrupt rows, so clear every index
        for status in ChainStatus::all() {
            pipe.srem(self.status_key(*status), id.as_str()).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        Ok(existing.is_some())
    }

    async fn list_by_status(&self, status: ChainStatus) -> StoreResult<Vec<ChainJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.smembers(self.status_key(status)).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let id = ChainId::from_string(id);
            match self.load(&mut conn, &id).await {
                Ok(Some(job)) if job.status == status => jobs.push(job),
                Ok(_) => debug!(chain_id = %id, "Skipping stale status index entry"),
                Err(e) => warn!(chain_id = %id, "Skipping unreadable chain row: {}", e),
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}
