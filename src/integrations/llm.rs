//! Completion capability used by the agents.
//!
//! [`LlmClient`] is the closed set of backends, chosen once from
//! configuration. Credential and connectivity failures degrade to
//! [`OfflineLlm`]; everything else is returned to the caller, whose own
//! fallback applies.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{info, warn};

use super::claude::ClaudeClient;
use super::ollama::{self, OllamaClient};
use super::openai::{self, OpenAIClient};
use crate::config::{LlmConfig, LlmProvider};
use crate::entities::extractor::heuristic_entities;
use crate::prompts::{EXTRACTOR_ROLE, RERANKER_ROLE, REWRITER_ROLE, ROUTER_ROLE, WRITER_ROLE};
use crate::{Error, Result};

/// Lazy, finite sequence of answer fragments.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Fragments of the same answer `complete` would give. Backends without
    /// native streaming yield the whole answer as one fragment.
    async fn stream(&self, system: &str, user: &str) -> Result<TextStream> {
        let text = self.complete(system, user).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// Configured completion backend.
#[derive(Debug, Clone)]
pub enum LlmClient {
    OpenAi {
        client: OpenAIClient,
        model: String,
        temperature: f32,
        max_tokens: u32,
    },
    Ollama {
        client: OllamaClient,
        model: String,
        temperature: f32,
    },
    Claude(ClaudeClient),
    Offline(OfflineLlm),
}

impl LlmClient {
    /// Build the backend named in `config`. A missing provider is the one
    /// fatal configuration error; a missing API key only downgrades to offline.
    pub fn from_config(config: &LlmConfig, timeout: Duration) -> Result<Self> {
        let provider = config.provider.ok_or_else(|| {
            Error::Config("no completion provider configured".to_string())
        })?;

        let client = match provider {
            LlmProvider::OpenAi => match config.api_key.as_deref() {
                Some(key) if !key.trim().is_empty() => {
                    let mut client = OpenAIClient::new(key, timeout)?;
                    if let Some(url) = &config.base_url {
                        client = client.with_base_url(url.clone());
                    }
                    LlmClient::OpenAi {
                        client,
                        model: config.model.clone(),
                        temperature: config.temperature,
                        max_tokens: config.max_tokens,
                    }
                }
                _ => {
                    warn!("OPENAI_API_KEY missing, completions fall back to offline mode");
                    LlmClient::Offline(OfflineLlm)
                }
            },
            LlmProvider::Ollama => {
                let url = config.base_url.as_deref().unwrap_or(ollama::OLLAMA_URL);
                LlmClient::Ollama {
                    client: OllamaClient::with_url(url, timeout)?,
                    model: config.model.clone(),
                    temperature: config.temperature,
                }
            }
            LlmProvider::Claude => match config.api_key.as_deref() {
                Some(key) if !key.trim().is_empty() => {
                    let mut client = ClaudeClient::new(key, &config.model, timeout)?
                        .with_sampling(config.temperature, config.max_tokens);
                    if let Some(url) = &config.base_url {
                        client = client.with_base_url(url.clone());
                    }
                    LlmClient::Claude(client)
                }
                _ => {
                    warn!("ANTHROPIC_API_KEY missing, completions fall back to offline mode");
                    LlmClient::Offline(OfflineLlm)
                }
            },
            LlmProvider::Offline => LlmClient::Offline(OfflineLlm),
        };

        info!(provider = client.name(), "Completion backend ready");
        Ok(client)
    }

    async fn complete_online(&self, system: &str, user: &str) -> Result<String> {
        match self {
            LlmClient::OpenAi {
                client,
                model,
                temperature,
                max_tokens,
            } => {
                let messages = vec![
                    openai::ChatMessage::system(system),
                    openai::ChatMessage::user(user),
                ];
                client
                    .chat_completion(messages, model, *temperature, *max_tokens)
                    .await
            }
            LlmClient::Ollama {
                client,
                model,
                temperature,
            } => {
                let messages = vec![
                    ollama::ChatMessage::new("system", system),
                    ollama::ChatMessage::new("user", user),
                ];
                client.chat(messages, model, *temperature).await
            }
            LlmClient::Claude(client) => client.chat_with_system(user, Some(system)).await,
            LlmClient::Offline(offline) => Ok(offline.respond(system, user)),
        }
    }

    async fn stream_online(&self, system: &str, user: &str) -> Result<TextStream> {
        match self {
            LlmClient::OpenAi {
                client,
                model,
                temperature,
                max_tokens,
            } => {
                let messages = vec![
                    openai::ChatMessage::system(system),
                    openai::ChatMessage::user(user),
                ];
                client
                    .chat_completion_stream(messages, model, *temperature, *max_tokens)
                    .await
            }
            LlmClient::Ollama {
                client,
                model,
                temperature,
            } => {
                let messages = vec![
                    ollama::ChatMessage::new("system", system),
                    ollama::ChatMessage::new("user", user),
                ];
                client.chat_stream(messages, model, *temperature).await
            }
            LlmClient::Claude(client) => {
                let text = client.chat_with_system(user, Some(system)).await?;
                Ok(stream::once(async move { Ok(text) }).boxed())
            }
            LlmClient::Offline(offline) => Ok(offline.stream_words(system, user)),
        }
    }

    fn should_degrade(&self, err: &Error) -> bool {
        matches!(err, Error::Unauthorized(_) | Error::Unavailable(_))
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    fn name(&self) -> &str {
        match self {
            LlmClient::OpenAi { .. } => LlmProvider::OpenAi.as_str(),
            LlmClient::Ollama { .. } => LlmProvider::Ollama.as_str(),
            LlmClient::Claude(_) => LlmProvider::Claude.as_str(),
            LlmClient::Offline(_) => LlmProvider::Offline.as_str(),
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        match self.complete_online(system, user).await {
            Err(err) if self.should_degrade(&err) => {
                warn!(provider = self.name(), "{}, answering offline", err);
                Ok(OfflineLlm.respond(system, user))
            }
            other => other,
        }
    }

    async fn stream(&self, system: &str, user: &str) -> Result<TextStream> {
        match self.stream_online(system, user).await {
            Err(err) if self.should_degrade(&err) => {
                warn!(provider = self.name(), "{}, streaming offline", err);
                Ok(OfflineLlm.stream_words(system, user))
            }
            other => other,
        }
    }
}

/// Deterministic stand-in that answers by recognising which agent is
/// asking (the role line of the system prompt).
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineLlm;

const OFFLINE_NOTICE: &str = "Offline mode: no language model is available to answer.";
const NO_CONTEXT: &str = "The provided context does not contain an answer.";

impl OfflineLlm {
    pub fn respond(&self, system: &str, user: &str) -> String {
        if system.contains(ROUTER_ROLE) {
            "HYBRID".to_string()
        } else if system.contains(RERANKER_ROLE) {
            String::new()
        } else if system.contains(REWRITER_ROLE) {
            labelled_line(user, "Query:").unwrap_or_default()
        } else if system.contains(EXTRACTOR_ROLE) {
            extract_as_json(user)
        } else if system.contains(WRITER_ROLE) {
            extractive_answer(user)
        } else {
            OFFLINE_NOTICE.to_string()
        }
    }

    fn stream_words(&self, system: &str, user: &str) -> TextStream {
        let answer = self.respond(system, user);
        let words: Vec<Result<String>> = answer
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        stream::iter(words).boxed()
    }
}

#[async_trait]
impl CompletionService for OfflineLlm {
    fn name(&self) -> &str {
        LlmProvider::Offline.as_str()
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        Ok(self.respond(system, user))
    }

    async fn stream(&self, system: &str, user: &str) -> Result<TextStream> {
        Ok(self.stream_words(system, user))
    }
}

fn labelled_line(text: &str, label: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix(label))
        .map(|rest| rest.trim().to_string())
}

fn extract_as_json(user: &str) -> String {
    let text = user.split_once("TEXT:").map(|(_, t)| t).unwrap_or(user);
    let items: Vec<serde_json::Value> = heuristic_entities(text)
        .into_iter()
        .map(|name| serde_json::json!({ "text": name, "class": "entity" }))
        .collect();
    serde_json::Value::Array(items).to_string()
}

fn extractive_answer(user: &str) -> String {
    let first_block = user.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("[DOC ")?;
        let (doc_id, text) = rest.split_once(']')?;
        Some((doc_id.trim().to_string(), text.trim().to_string()))
    });

    match first_block {
        Some((doc_id, text)) if !text.is_empty() => {
            let snippet: String = text.chars().take(300).collect();
            format!("According to [{}]: {}", doc_id, snippet)
        }
        _ => NO_CONTEXT.to_string(),
    }
}
