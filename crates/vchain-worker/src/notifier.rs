//! Terminal-state notifications.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use vchain_models::{ChainJob, ChainStatus};

use crate::error::{ChainError, WorkerResult};

/// HTTP timeout for one delivery.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload sent when a chain completes or fails for good.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEvent {
    pub chain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: ChainStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

impl ChainEvent {
    pub fn from_job(job: &ChainJob, total_cost: Option<f64>) -> Self {
        Self {
            chain_id: job.id.to_string(),
            user_id: job.user_id.clone(),
            status: job.status,
            final_video_url: job.final_video_url.clone(),
            thumbnail_url: job.thumbnail_url.clone(),
            error_message: job.error_message.clone(),
            total_cost,
        }
    }
}

/// Receives chain terminal events. Delivery is best effort.
#[async_trait]
pub trait ChainNotifier: Send + Sync {
    async fn notify(&self, event: &ChainEvent) -> WorkerResult<()>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl ChainNotifier for NoopNotifier {
    async fn notify(&self, _event: &ChainEvent) -> WorkerResult<()> {
        Ok(())
    }
}

/// Posts events as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> WorkerResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::config_error(format!("Failed to build webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Webhook URL from `CHAIN_WEBHOOK_URL`, if set.
    pub fn from_env() -> WorkerResult<Option<Self>> {
        match std::env::var("CHAIN_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()).map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ChainNotifier for WebhookNotifier {
    async fn notify(&self, event: &ChainEvent) -> WorkerResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| ChainError::api_failed(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ChainError::api_failed(format!(
                "Webhook returned HTTP {}",
                response.status().as_u16()
            )));
        }
        debug!(chain_id = %event.chain_id, status = %event.status, "Webhook delivered");
        Ok(())
    }
}
