//! Video generation API seam and the OpenAI `/v1/videos` client.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use vchain_models::{Resolution, VideoModel};

use crate::config::OpenAiConfig;
use crate::error::{ChainError, WorkerResult};

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: VideoModel,
    pub size: Resolution,
    pub seconds: u32,
    /// JPEG continuing from the previous segment, already at `size`
    pub input_reference: Option<Vec<u8>>,
}

/// Provider-side job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoJobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl VideoJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoJobState::Completed | VideoJobState::Failed)
    }
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoJobStatus {
    pub state: VideoJobState,
    /// 0-100
    pub progress: u8,
    pub error: Option<String>,
}

/// Downloadable artifact of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactVariant {
    Video,
    Thumbnail,
}

impl ArtifactVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactVariant::Video => "video",
            ArtifactVariant::Thumbnail => "thumbnail",
        }
    }
}

/// External video generation service.
#[async_trait]
pub trait VideoGenerationApi: Send + Sync {
    /// Start a generation and return the provider's job id.
    async fn submit(&self, request: &GenerationRequest) -> WorkerResult<String>;

    async fn status(&self, job_id: &str) -> WorkerResult<VideoJobStatus>;

    async fn download(&self, job_id: &str, variant: ArtifactVariant) -> WorkerResult<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct VideoJobResponse {
    id: String,
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    error: Option<VideoJobError>,
}

#[derive(Debug, Deserialize)]
struct VideoJobError {
    #[serde(default)]
    message: Option<String>,
}

impl VideoJobResponse {
    fn into_status(self) -> VideoJobStatus {
        let state = match self.status.as_str() {
            "completed" | "succeeded" => VideoJobState::Completed,
            "failed" | "cancelled" | "canceled" => VideoJobState::Failed,
            "in_progress" | "processing" | "running" => VideoJobState::Running,
            _ => VideoJobState::Pending,
        };
        let progress = self
            .progress
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(if state == VideoJobState::Completed { 100 } else { 0 });
        VideoJobStatus {
            state,
            progress,
            error: self.error.and_then(|e| e.message),
        }
    }
}

/// OpenAI-compatible video generation client.
pub struct OpenAiVideoClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiVideoClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/v1/videos{}", self.config.base_url.trim_end_matches('/'), suffix)
    }

    async fn check(response: reqwest::Response, what: &str) -> WorkerResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        Err(ChainError::api_failed(format!(
            "{} returned {}: {}",
            what, status, error_text
        )))
    }
}

#[async_trait]
impl VideoGenerationApi for OpenAiVideoClient {
    async fn submit(&self, request: &GenerationRequest) -> WorkerResult<String> {
        let mut form = Form::new()
            .text("model", request.model.as_str().to_string())
            .text("prompt", request.prompt.clone())
            .text("size", request.size.to_size_string())
            .text("seconds", request.seconds.to_string());

        if let Some(image) = &request.input_reference {
            let part = Part::bytes(image.clone())
                .file_name("reference.jpg")
                .mime_str("image/jpeg")
                .map_err(|e| ChainError::api_failed(format!("Invalid reference part: {}", e)))?;
            form = form.part("input_reference", part);
        }

        let response = self
            .client
            .post(self.url(""))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChainError::api_failed(format!("Video submit failed: {}", e)))?;
        let response = Self::check(response, "Video submit").await?;

        let job: VideoJobResponse = response
            .json()
            .await
            .map_err(|e| ChainError::api_failed(format!("Failed to parse submit response: {}", e)))?;

        debug!(job_id = %job.id, status = %job.status, "Submitted video generation");
        Ok(job.id)
    }

    async fn status(&self, job_id: &str) -> WorkerResult<VideoJobStatus> {
        let response = self
            .client
            .get(self.url(&format!("/{}", job_id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| ChainError::api_failed(format!("Status request failed: {}", e)))?;
        let response = Self::check(response, "Video status").await?;

        let job: VideoJobResponse = response
            .json()
            .await
            .map_err(|e| ChainError::api_failed(format!("Failed to parse status response: {}", e)))?;
        Ok(job.into_status())
    }

    async fn download(&self, job_id: &str, variant: ArtifactVariant) -> WorkerResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url(&format!("/{}/content", job_id)))
            .query(&[("variant", variant.as_str())])
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| ChainError::api_failed(format!("Download request failed: {}", e)))?;
        let response = Self::check(response, "Video download").await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChainError::api_failed(format!("Download body failed: {}", e)))?;
        if bytes.is_empty() {
            return Err(ChainError::api_failed(format!(
                "Empty {} artifact for {}",
                variant.as_str(),
                job_id
            )));
        }
        Ok(bytes.to_vec())
    }
}
