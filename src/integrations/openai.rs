//! OpenAI chat completions client (plain and streaming).

use std::env;
use std::time::Duration;

use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{line_stream, send_error, status_error, TextStream};
use crate::{Error, Result};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "openai";

/// OpenAI client.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create client from environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(api_key, Duration::from_secs(30))
    }

    /// Create client with API key and per-request timeout.
    pub fn new<S: Into<String>>(api_key: S, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("OPENAI_API_KEY is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("agentic_rag/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            base_url: OPENAI_API_URL.to_string(),
        })
    }

    /// Point the client at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, messages: Vec<ChatMessage>, model: &str, temperature: f32, max_tokens: u32, stream: bool) -> ChatRequest {
        // gpt-5 family rejects sampling parameters.
        let tuned = !model.starts_with("gpt-5");
        ChatRequest {
            model: model.to_string(),
            messages,
            temperature: tuned.then_some(temperature),
            max_tokens: tuned.then_some(max_tokens),
            stream,
        }
    }

    /// Chat completion.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = self.request(messages, model, temperature, max_tokens, false);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(status_error(PROVIDER, "OpenAI", status, &text));
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::completion(PROVIDER, format!("Invalid response: {}", e)))?;

        chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| Error::completion(PROVIDER, "Empty response from OpenAI"))
    }

    /// Streaming chat completion (server-sent events).
    pub async fn chat_completion_stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<TextStream> {
        let request = self.request(messages, model, temperature, max_tokens, true);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, "OpenAI", status, &text));
        }

        let fragments = line_stream(response).filter_map(|line| async move {
            match line {
                Ok(line) => parse_sse_line(&line).map(Ok),
                Err(err) => Some(Err(err)),
            }
        });

        Ok(fragments.boxed())
    }
}

/// Extract the content delta from one SSE line; `None` for keep-alives,
/// `[DONE]` and deltas without text.
fn parse_sse_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let chunk: StreamChunk = serde_json::from_str(payload).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.to_string()),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_new_rejects_empty_key() {
        let err = OpenAIClient::new("   ", Duration::from_secs(1)).unwrap_err();
        assert!(format!("{}", err).contains("empty"));
    }

    fn client(server: &MockServer) -> OpenAIClient {
        OpenAIClient::new("test_key", Duration::from_secs(5))
            .expect("client")
            .with_base_url(server.base_url())
    }

    #[tokio::test]
    async fn chat_completion_returns_first_choice_content() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("Authorization", "Bearer test_key");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": " Hello! " } }
                ]
            }));
        });

        let reply = client(&server)
            .chat_completion(
                vec![ChatMessage::system("sys"), ChatMessage::user("Hi")],
                "gpt-4o-mini",
                0.2,
                32,
            )
            .await
            .unwrap();

        assert_eq!(reply, "Hello!");
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_completion_maps_401_to_unauthorized() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401).body("invalid api key");
        });

        let err = client(&server)
            .chat_completion(vec![], "gpt-4o-mini", 0.2, 32)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn chat_completion_returns_error_on_non_success_status() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("rate limited");
        });

        let err = client(&server)
            .chat_completion(vec![], "gpt-4o-mini", 0.2, 32)
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("OpenAI error 429"));
        assert!(msg.contains("rate limited"));
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_completion_returns_error_on_invalid_json() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body("not json");
        });

        let err = client(&server)
            .chat_completion(vec![], "gpt-4o-mini", 0.2, 32)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Invalid response"));
    }

    #[tokio::test]
    async fn chat_completion_returns_error_on_empty_choices() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({ "choices": [] }));
        });

        let err = client(&server)
            .chat_completion(vec![], "gpt-4o-mini", 0.2, 32)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Empty response from OpenAI"));
    }

    #[tokio::test]
    async fn gpt5_requests_omit_sampling_parameters() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions").is_true(|req| {
                let body = String::from_utf8_lossy(req.body().as_ref());
                !body.contains("temperature") && !body.contains("max_tokens")
            });
            then.status(200).json_body(json!({
                "choices": [ { "message": { "role": "assistant", "content": "ok" } } ]
            }));
        });

        let reply = client(&server)
            .chat_completion(vec![ChatMessage::user("q")], "gpt-5-mini", 0.2, 32)
            .await
            .unwrap();

        assert_eq!(reply, "ok");
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_completion_stream_yields_deltas_in_order() {
        let server = MockServer::start_async().await;

        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ACME \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"earned $12M\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions").is_true(|req| {
                String::from_utf8_lossy(req.body().as_ref()).contains("\"stream\":true")
            });
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        });

        let stream = client(&server)
            .chat_completion_stream(vec![ChatMessage::user("q")], "gpt-4o-mini", 0.2, 32)
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;

        assert_eq!(fragments, vec!["ACME ".to_string(), "earned $12M".to_string()]);
    }

    #[test]
    fn parse_sse_line_skips_non_content_lines() {
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line("data: {broken"), None);
        assert_eq!(
            parse_sse_line("data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"),
            Some("x".to_string())
        );
    }
}
