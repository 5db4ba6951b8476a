//! Runtime configuration
//!
//! Loads `agentic_rag.yml` (optional) after `.env`, then lets environment
//! variables override individual values.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Default constants (used when neither file nor environment sets a value)
pub const CONFIG_FILE: &str = "agentic_rag.yml";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CHUNK_MIN_CHARS: usize = 200;
pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1000;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_REQUEST_SECS: u64 = 30;
pub const DEFAULT_SYNC_CONCURRENCY: usize = 3;
pub const DEFAULT_SYNC_RECORD_LIMIT: usize = 1000;
pub const DEFAULT_LOCAL_DIMENSION: usize = 256;

/// Completion backends. Selected once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Ollama,
    Claude,
    /// Deterministic stand-in, no network.
    Offline,
}

impl LlmProvider {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "ollama" => Some(LlmProvider::Ollama),
            "claude" | "anthropic" => Some(LlmProvider::Claude),
            "offline" | "stub" => Some(LlmProvider::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Ollama => "ollama",
            LlmProvider::Claude => "claude",
            LlmProvider::Offline => "offline",
        }
    }
}

/// Embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    OpenAi,
    Ollama,
    Local,
}

impl EmbeddingProvider {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(EmbeddingProvider::OpenAi),
            "ollama" => Some(EmbeddingProvider::Ollama),
            "local" | "hash" => Some(EmbeddingProvider::Local),
            _ => None,
        }
    }
}

/// How the router proposes a strategy before falling back to preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Surface heuristics on the query text.
    Heuristic,
    /// Ask the completion model to pick a strategy.
    Model,
}

impl RoutingMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "heuristic" => Some(RoutingMode::Heuristic),
            "model" | "llm" => Some(RoutingMode::Model),
            _ => None,
        }
    }
}

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    llm: Option<LlmSection>,
    embedding: Option<EmbeddingSection>,
    retrieval: Option<RetrievalSection>,
    agent: Option<AgentSection>,
    storage: Option<StorageSection>,
    timeouts: Option<TimeoutSection>,
    sync: Option<SyncSection>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmSection {
    provider: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingSection {
    provider: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    dimension: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalSection {
    chunk_min_chars: Option<usize>,
    chunk_max_chars: Option<usize>,
    top_k: Option<usize>,
    rerank: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentSection {
    max_iterations: Option<usize>,
    confidence_threshold: Option<f32>,
    routing: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutSection {
    request_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncSection {
    max_concurrent: Option<usize>,
    record_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// `None` means nobody configured a provider; start-up refuses that.
    pub provider: Option<LlmProvider>,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: Option<String>,
    pub dimension: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub chunk_min_chars: usize,
    pub chunk_max_chars: usize,
    pub top_k: usize,
    pub rerank: bool,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub confidence_threshold: f32,
    pub routing: RoutingMode,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_concurrent: usize,
    pub record_limit: usize,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub agent: AgentConfig,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load from `path`, or from the default locations when `path` is `None`.
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_dotenv();

        let yaml = match path {
            Some(path) => Self::read_yaml(path)?,
            None => {
                let candidates = [PathBuf::from(CONFIG_FILE), Path::new("..").join(CONFIG_FILE)];
                match candidates.iter().find(|p| p.exists()) {
                    Some(found) => Self::read_yaml(found)?,
                    None => YamlConfig::default(),
                }
            }
        };

        Ok(Self::from_yaml(yaml))
    }

    /// Parse configuration from a YAML string (environment overrides still apply).
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let yaml: YamlConfig = serde_yaml::from_str(content)?;
        Ok(Self::from_yaml(yaml))
    }

    /// Offline configuration rooted at `data_dir`: no network at all.
    pub fn offline(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::defaults();
        config.llm.provider = Some(LlmProvider::Offline);
        config.embedding.provider = EmbeddingProvider::Local;
        config.data_dir = data_dir.into();
        config
    }

    fn read_yaml(path: &Path) -> Result<YamlConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Resolve a value: `${VAR}` placeholders and an explicit env key both win over the file.
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Ok(env_val) = std::env::var(env_key) {
            if !env_val.trim().is_empty() {
                return Some(env_val.trim().to_string());
            }
        }
        match value {
            Some(v) if v.starts_with("${") && v.ends_with('}') => {
                let var_name = &v[2..v.len() - 1];
                std::env::var(var_name)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            }
            other => other,
        }
    }

    fn resolve_env_parsed<T: std::str::FromStr>(value: Option<T>, env_key: &str) -> Option<T> {
        std::env::var(env_key)
            .ok()
            .and_then(|v| v.trim().parse::<T>().ok())
            .or(value)
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        let defaults = Self::defaults();
        let llm = yaml.llm.unwrap_or_default();
        let embedding = yaml.embedding.unwrap_or_default();
        let retrieval = yaml.retrieval.unwrap_or_default();
        let agent = yaml.agent.unwrap_or_default();
        let storage = yaml.storage.unwrap_or_default();
        let timeouts = yaml.timeouts.unwrap_or_default();
        let sync = yaml.sync.unwrap_or_default();

        let provider = Self::resolve_env_string(llm.provider, "LLM_PROVIDER")
            .as_deref()
            .and_then(LlmProvider::parse);

        let api_key_env = match provider {
            Some(LlmProvider::Claude) => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        };

        let base_url = match provider {
            Some(LlmProvider::Ollama) => Self::resolve_env_string(llm.base_url, "OLLAMA_URL"),
            _ => Self::resolve_env_string(llm.base_url, "LLM_BASE_URL"),
        };

        let embedding_provider = Self::resolve_env_string(embedding.provider, "EMBEDDING_PROVIDER")
            .as_deref()
            .and_then(EmbeddingProvider::parse)
            .unwrap_or(defaults.embedding.provider);

        Self {
            llm: LlmConfig {
                provider,
                model: Self::resolve_env_string(llm.model, "LLM_MODEL")
                    .unwrap_or_else(|| default_model(provider).to_string()),
                base_url,
                api_key: Self::resolve_env_string(llm.api_key, api_key_env),
                temperature: llm.temperature.unwrap_or(defaults.llm.temperature),
                max_tokens: llm.max_tokens.unwrap_or(defaults.llm.max_tokens),
            },
            embedding: EmbeddingConfig {
                provider: embedding_provider,
                model: Self::resolve_env_string(embedding.model, "EMBEDDING_MODEL")
                    .unwrap_or(defaults.embedding.model),
                base_url: embedding.base_url,
                dimension: embedding.dimension.unwrap_or(defaults.embedding.dimension),
            },
            retrieval: RetrievalConfig {
                chunk_min_chars: retrieval
                    .chunk_min_chars
                    .unwrap_or(DEFAULT_CHUNK_MIN_CHARS),
                chunk_max_chars: retrieval
                    .chunk_max_chars
                    .unwrap_or(DEFAULT_CHUNK_MAX_CHARS),
                top_k: retrieval.top_k.unwrap_or(DEFAULT_TOP_K),
                rerank: retrieval.rerank.unwrap_or(true),
            },
            agent: AgentConfig {
                max_iterations: Self::resolve_env_parsed(
                    agent.max_iterations,
                    "AGENT_MAX_ITERATIONS",
                )
                .unwrap_or(DEFAULT_MAX_ITERATIONS),
                confidence_threshold: Self::resolve_env_parsed(
                    agent.confidence_threshold,
                    "AGENT_CONFIDENCE_THRESHOLD",
                )
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                routing: agent
                    .routing
                    .as_deref()
                    .and_then(RoutingMode::parse)
                    .unwrap_or(RoutingMode::Heuristic),
            },
            data_dir: Self::resolve_env_string(storage.data_dir, "DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            request_timeout: Duration::from_secs(
                timeouts.request_secs.unwrap_or(DEFAULT_REQUEST_SECS),
            ),
            sync: SyncConfig {
                max_concurrent: sync.max_concurrent.unwrap_or(DEFAULT_SYNC_CONCURRENCY),
                record_limit: sync.record_limit.unwrap_or(DEFAULT_SYNC_RECORD_LIMIT),
            },
        }
    }

    /// Defaults without any provider. `validate` rejects this until one is set.
    fn defaults() -> Self {
        Self {
            llm: LlmConfig {
                provider: None,
                model: default_model(None).to_string(),
                base_url: None,
                api_key: None,
                temperature: 0.2,
                max_tokens: 2000,
            },
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::Local,
                model: "text-embedding-3-small".to_string(),
                base_url: None,
                dimension: DEFAULT_LOCAL_DIMENSION,
            },
            retrieval: RetrievalConfig {
                chunk_min_chars: DEFAULT_CHUNK_MIN_CHARS,
                chunk_max_chars: DEFAULT_CHUNK_MAX_CHARS,
                top_k: DEFAULT_TOP_K,
                rerank: true,
            },
            agent: AgentConfig {
                max_iterations: DEFAULT_MAX_ITERATIONS,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                routing: RoutingMode::Heuristic,
            },
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_SECS),
            sync: SyncConfig {
                max_concurrent: DEFAULT_SYNC_CONCURRENCY,
                record_limit: DEFAULT_SYNC_RECORD_LIMIT,
            },
        }
    }

    /// Reject configurations the system must not start with.
    pub fn validate(&self) -> Result<()> {
        if self.llm.provider.is_none() {
            return Err(Error::Config(
                "no completion provider configured (set llm.provider or LLM_PROVIDER)"
                    .to_string(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(Error::Config("agent.max_iterations must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.agent.confidence_threshold) {
            return Err(Error::Config(format!(
                "agent.confidence_threshold must be within [0, 1], got {}",
                self.agent.confidence_threshold
            )));
        }
        if self.retrieval.chunk_min_chars >= self.retrieval.chunk_max_chars {
            return Err(Error::Config(format!(
                "retrieval.chunk_min_chars ({}) must be below chunk_max_chars ({})",
                self.retrieval.chunk_min_chars, self.retrieval.chunk_max_chars
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be >= 1".to_string()));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be >= 1".to_string()));
        }
        Ok(())
    }
}

fn default_model(provider: Option<LlmProvider>) -> &'static str {
    match provider {
        Some(LlmProvider::Ollama) => "llama3.1",
        Some(LlmProvider::Claude) => "claude-sonnet-4-5-20250929",
        _ => "gpt-4o-mini",
    }
}
