//! Planning LLM seam and the OpenAI chat client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::error::{ChainError, WorkerResult};

/// Text completion used by the segment planner.
#[async_trait]
pub trait PlanningLlm: Send + Sync {
    /// Run one completion and return the raw text.
    async fn complete(&self, system: &str, user: &str) -> WorkerResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChatClient {
    client: Client,
    config: OpenAiConfig,
    model: String,
}

impl OpenAiChatClient {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";

    pub fn new(config: OpenAiConfig, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            config,
            model: model.unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PlanningLlm for OpenAiChatClient {
    async fn complete(&self, system: &str, user: &str) -> WorkerResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.7,
        };

        debug!(model = %self.model, "Requesting segment plan");
        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::api_failed(format!("Chat request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChainError::api_failed(format!(
                "Chat API returned {}: {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChainError::api_failed(format!("Failed to parse chat response: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ChainError::api_failed("No content in chat response"))
    }
}
