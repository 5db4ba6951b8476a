//! Ollama client for local LLM inference and embeddings.

use std::time::Duration;

use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{line_stream, send_error, status_error, TextStream};
use crate::{Error, Result};

pub const OLLAMA_URL: &str = "http://localhost:11434";
const PROVIDER: &str = "ollama";

/// Ollama client for local LLM.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    /// Create new client with default URL.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_url(OLLAMA_URL, timeout)
    }

    /// Create client with custom URL.
    pub fn with_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Check if Ollama server is running.
    pub async fn is_running(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Chat with model.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options: ChatOptions { temperature },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, "Ollama", status, &text));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::completion(PROVIDER, format!("Invalid response: {}", e)))?;

        Ok(result.message.content.trim().to_string())
    }

    /// Streaming chat; Ollama answers with one JSON object per line.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
    ) -> Result<TextStream> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: true,
            options: ChatOptions { temperature },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, "Ollama", status, &text));
        }

        let fragments = line_stream(response).filter_map(|line| async move {
            match line {
                Ok(line) => parse_ndjson_line(&line).map(Ok),
                Err(err) => Some(Err(err)),
            }
        });

        Ok(fragments.boxed())
    }

    /// Embed one text with an embedding model (e.g. `nomic-embed-text`).
    pub async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: model.to_string(),
            prompt: text.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("Ollama error {}: {}", status, text)));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Invalid response: {}", e)))?;

        if result.embedding.is_empty() {
            return Err(Error::Embedding("Ollama returned an empty embedding".to_string()));
        }
        Ok(result.embedding)
    }
}

fn parse_ndjson_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let chunk: StreamChunk = serde_json::from_str(line).ok()?;
    chunk
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty())
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    message: Option<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::with_url(&server.base_url(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn chat_returns_assistant_message() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").is_true(|req| {
                String::from_utf8_lossy(req.body().as_ref()).contains("\"stream\":false")
            });
            then.status(200).json_body(json!({
                "message": {
                    "role": "assistant",
                    "content": "Hello!"
                }
            }));
        });

        let reply = client(&server)
            .chat(vec![ChatMessage::new("user", "Hi")], "llama3", 0.3)
            .await
            .unwrap();

        assert_eq!(reply, "Hello!");
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_reports_error_on_http_failure() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(500).body("boom");
        });

        let err = client(&server)
            .chat(vec![ChatMessage::new("user", "Hi")], "llama3", 0.2)
            .await
            .unwrap_err();

        let msg = format!("{err}");
        assert!(msg.contains("Ollama error 500"));
        assert!(msg.contains("boom"));
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_stream_reads_ndjson_fragments() {
        let server = MockServer::start_async().await;

        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"ACME \"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"earned\"},\"done\":false}\n",
            "{\"done\":true}\n"
        );
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200).body(body);
        });

        let stream = client(&server)
            .chat_stream(vec![ChatMessage::new("user", "q")], "llama3", 0.2)
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;

        assert_eq!(fragments, vec!["ACME ".to_string(), "earned".to_string()]);
    }

    #[tokio::test]
    async fn embed_returns_vector() {
        let server = MockServer::start_async().await;

        let embed_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/embeddings")
                .json_body(json!({ "model": "nomic-embed-text", "prompt": "ACME" }));
            then.status(200).json_body(json!({ "embedding": [0.5, -0.25, 1.0] }));
        });

        let vector = client(&server).embed("ACME", "nomic-embed-text").await.unwrap();

        assert_eq!(vector, vec![0.5, -0.25, 1.0]);
        embed_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn embed_rejects_empty_vector() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(200).json_body(json!({ "embedding": [] }));
        });

        let err = client(&server).embed("x", "nomic-embed-text").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn is_running_respects_http_status() {
        let healthy = MockServer::start_async().await;
        healthy.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200);
        });

        let failing = MockServer::start_async().await;
        failing.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(503);
        });

        assert!(client(&healthy).is_running().await);
        assert!(!client(&failing).is_running().await);
    }

    #[test]
    fn parse_ndjson_line_ignores_done_marker() {
        assert_eq!(parse_ndjson_line("{\"done\":true}"), None);
        assert_eq!(parse_ndjson_line(""), None);
        assert_eq!(parse_ndjson_line("garbage"), None);
    }
}
