//! Agentic Hybrid RAG Library
//!
//! This library provides tools to:
//! - Chunk documents and index them for BM25 and dense (embedding) search
//! - Merge both ranklists with reciprocal rank fusion and rerank with an LLM
//! - Track entities per document to filter entity-driven searches
//! - Answer questions with a bounded agent loop (route, retrieve, evaluate,
//!   rewrite) and a cited synthesis step, in batch or as an event stream
//! - Sync folders of text files into the corpus with bounded concurrency
//! - Degrade to deterministic offline behaviour when no model is reachable

pub mod agents;
pub mod config;
pub mod entities;
pub mod error;
pub mod external;
pub mod integrations;
pub mod metrics;
pub mod prompts;
pub mod retrieval;
pub mod sync;
pub mod system;

// Re-export common types
pub use agents::{AgentAnswer, AgentEvent, AskOptions, Decision, Orchestrator};
pub use config::Config;
pub use error::{Error, Result};
pub use integrations::{
    ClaudeClient, CompletionService, EmbeddingService, LlmClient, OfflineLlm, OllamaClient,
    OpenAIClient,
};
pub use prompts::{load_prompt, Prompt};
pub use retrieval::{Corpus, SearchHit, Strategy};
pub use system::{IngestOutcome, RagSystem, SystemStatus};

pub mod commands;
