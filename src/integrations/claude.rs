//! Anthropic Claude API Client.

use std::env;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{send_error, status_error};
use crate::{Error, Result};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "claude";

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Anthropic Claude client.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ClaudeClient {
    /// Create client from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
        Self::new(api_key, DEFAULT_CLAUDE_MODEL, Duration::from_secs(30))
    }

    /// Create client with API key, model and per-request timeout.
    pub fn new<S: Into<String>>(api_key: S, model: &str, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("ANTHROPIC_API_KEY is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("agentic_rag/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: CLAUDE_API_URL.to_string(),
            model: model.to_string(),
            temperature: 0.2,
            max_tokens: 1024,
        })
    }

    /// Set the model.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Set sampling temperature and the output token cap.
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Point the client at another Messages-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Chat with an optional system prompt.
    pub async fn chat_with_system(&self, message: &str, system: Option<&str>) -> Result<String> {
        let payload = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: message.to_string(),
            }],
            system: system.map(str::to_string),
        };

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(status_error(PROVIDER, "Claude", status, &text));
        }

        let claude_response: ClaudeResponse = serde_json::from_str(&text).map_err(|e| {
            Error::completion(PROVIDER, format!("Invalid Claude response: {} - {}", e, text))
        })?;

        claude_response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text.trim().to_string()),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| Error::completion(PROVIDER, "Empty response from Claude"))
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
