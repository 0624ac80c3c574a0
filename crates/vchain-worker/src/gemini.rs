//! Gemini client for segment planning.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ChainError, WorkerResult};
use crate::llm::PlanningLlm;

/// Models tried in order when no override is configured.
const FALLBACK_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.5-flash-lite", "gemini-2.5-pro"];

/// Gemini API client.
pub struct GeminiClient {
    api_key: String,
    client: Client,
    base_url: String,
    models: Vec<String>,
}

/// Gemini API request.
#[derive(Debug, Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

impl GeminiClient {
    /// Create a new Gemini client from `GEMINI_API_KEY`.
    pub fn from_env(model: Option<String>) -> WorkerResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ChainError::config_error("GEMINI_API_KEY not set"))?;
        Ok(Self::new(
            api_key,
            "https://generativelanguage.googleapis.com",
            model,
        ))
    }

    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: Option<String>) -> Self {
        let models = match model {
            Some(m) => vec![m],
            None => FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
        };
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: base_url.into(),
            models,
        }
    }

    /// Call Gemini API.
    async fn call_gemini_api(&self, model: &str, system: &str, user: &str) -> WorkerResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.api_key
        );

        let request = GeminiRequest {
            system_instruction: Content {
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
            contents: vec![Content {
                parts: vec![Part {
                    text: user.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::api_failed(format!("Gemini API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChainError::api_failed(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            ChainError::api_failed(format!("Failed to parse Gemini response: {}", e))
        })?;

        gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ChainError::api_failed("No content in Gemini response"))
    }
}

#[async_trait]
impl PlanningLlm for GeminiClient {
    async fn complete(&self, system: &str, user: &str) -> WorkerResult<String> {
        let mut last_error = None;

        for model in &self.models {
            info!("Attempting Gemini API with model: {}", model);
            match self.call_gemini_api(model, system, user).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("Failed with model {}: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ChainError::api_failed("All Gemini models failed")))
    }
}
