//! External integrations module.
//!
//! Provides clients for:
//! - OpenAI (chat, streaming chat)
//! - Ollama (local LLM chat, streaming chat, embeddings)
//! - Anthropic Claude (messages)
//!
//! plus the capability traits the core depends on: [`CompletionService`]
//! and [`EmbeddingService`].

pub mod claude;
pub mod embeddings;
pub mod llm;
pub mod ollama;
pub mod openai;

use std::collections::VecDeque;

use futures::stream::{BoxStream, StreamExt};
use reqwest::StatusCode;

use crate::{Error, Result};

pub use claude::ClaudeClient;
pub use embeddings::{embedder_from_config, EmbeddingService, LocalEmbedder, OllamaEmbedder, OpenAiEmbedder};
pub use llm::{CompletionService, LlmClient, OfflineLlm, TextStream};
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

/// Map a transport failure: refused/unresolvable hosts are "unavailable"
/// (callers may degrade), the rest are plain HTTP errors.
pub(crate) fn send_error(provider: &str, err: reqwest::Error) -> Error {
    if err.is_connect() {
        Error::Unavailable(format!("{provider}: {err}"))
    } else if err.is_timeout() {
        Error::Timeout(provider.to_string())
    } else {
        Error::Http(format!("{provider} request failed: {err}"))
    }
}

/// Map a non-success status. 401/403 become `Unauthorized`.
pub(crate) fn status_error(provider: &str, label: &str, status: StatusCode, body: &str) -> Error {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::Unauthorized(provider.to_string())
    } else {
        Error::completion(provider, format!("{} error {}: {}", label, status, body))
    }
}

/// Split a streaming body into text lines (without the trailing newline).
pub(crate) fn line_stream(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let state = LineState {
        bytes: response.bytes_stream().boxed(),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                        let text = String::from_utf8_lossy(&line);
                        state
                            .ready
                            .push_back(text.trim_end_matches(['\r', '\n']).to_string());
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(Error::Http(format!("stream interrupted: {err}"))), state));
                }
                None => {
                    state.done = true;
                    if !state.buffer.is_empty() {
                        let rest = std::mem::take(&mut state.buffer);
                        state
                            .ready
                            .push_back(String::from_utf8_lossy(&rest).trim_end().to_string());
                    }
                }
            }
        }
    })
    .boxed()
}

struct LineState {
    bytes: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    done: bool,
}
