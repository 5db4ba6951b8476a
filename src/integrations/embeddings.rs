//! Embedding backends: OpenAI, Ollama and a deterministic local hasher.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as AsyncOpenAiClient,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::ollama::{self, OllamaClient};
use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::retrieval::tokenizer::tokenize;
use crate::{Error, Result};

/// Longest input (in chars) sent to a remote embedding model.
const MAX_EMBED_CHARS: usize = 8000;

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every vector this service returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Build the configured embedder. OpenAI without a key falls back to local.
pub fn embedder_from_config(
    config: &EmbeddingConfig,
    timeout: Duration,
) -> Result<Arc<dyn EmbeddingService>> {
    let embedder: Arc<dyn EmbeddingService> = match config.provider {
        EmbeddingProvider::OpenAi => match OpenAiEmbedder::from_env(&config.model) {
            Ok(embedder) => {
                info!(model = %config.model, "Using OpenAI embeddings");
                Arc::new(embedder)
            }
            Err(err) => {
                warn!("Falling back to local embeddings ({err})");
                Arc::new(LocalEmbedder::new(config.dimension))
            }
        },
        EmbeddingProvider::Ollama => {
            let url = config.base_url.as_deref().unwrap_or(ollama::OLLAMA_URL);
            Arc::new(OllamaEmbedder::new(
                OllamaClient::with_url(url, timeout)?,
                &config.model,
                config.dimension,
            ))
        }
        EmbeddingProvider::Local => Arc::new(LocalEmbedder::new(config.dimension)),
    };
    Ok(embedder)
}

fn clip(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_EMBED_CHARS) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// OpenAI embeddings via `async-openai`.
pub struct OpenAiEmbedder {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// Create from OPENAI_API_KEY.
    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn new(api_key: impl Into<String>, model: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key.into());
        Self {
            client: AsyncOpenAiClient::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let processed: Vec<String> = texts
            .iter()
            .map(|t| clip(t))
            .filter(|t| !t.is_empty())
            .collect();

        if processed.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        debug!("Generating embeddings for {} texts", processed.len());

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(processed))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        debug!(
            "Generated {} embeddings, tokens used: {}",
            response.data.len(),
            response.usage.total_tokens
        );

        // Empty inputs were not sent; they map back to empty vectors.
        let mut result = Vec::with_capacity(texts.len());
        let mut embed_iter = response.data.into_iter();
        for text in texts {
            if text.trim().is_empty() {
                result.push(Vec::new());
            } else if let Some(embed) = embed_iter.next() {
                result.push(embed.embedding);
            } else {
                return Err(Error::Embedding("fewer embeddings than inputs".to_string()));
            }
        }

        Ok(result)
    }
}

/// Ollama `/api/embeddings`.
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: &str, dimension: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingService for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(&clip(text), &self.model).await
    }
}

/// Deterministic, fast embedding for offline/local use: hashed bag of
/// tokens, L2-normalised.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            vec[idx] += 1.0;
        }

        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}
