//! Composition root: builds every component once from [`Config`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::agents::{
    AgentAnswer, AgentEvent, AskOptions, LoopSettings, Orchestrator, QueryRewriter,
    RetrievalAgent, Router, Synthesizer,
};
use crate::config::Config;
use crate::entities::{EntityExtraction, EntityGraph, LlmExtractor, INGEST_INSTRUCTION};
use crate::external;
use crate::integrations::{embedder_from_config, CompletionService, LlmClient};
use crate::retrieval::{Chunker, Corpus, DocSummary, Reranker, SearchHit, StoredDoc};
use crate::sync::{read_text_files, DataSource, SyncManager};
use crate::{Error, Result};

/// Result of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub doc_id: String,
    pub chunks: usize,
    pub entities: usize,
}

/// Writes documents into the corpus and the entity graph together.
#[derive(Clone)]
pub struct Ingestor {
    corpus: Arc<Corpus>,
    graph: Arc<RwLock<EntityGraph>>,
    extractor: Arc<dyn EntityExtraction>,
    timeout: Duration,
}

impl Ingestor {
    pub fn new(
        corpus: Arc<Corpus>,
        graph: Arc<RwLock<EntityGraph>>,
        extractor: Arc<dyn EntityExtraction>,
        timeout: Duration,
    ) -> Self {
        Self {
            corpus,
            graph,
            extractor,
            timeout,
        }
    }

    /// Index `text` under `doc_id`, replacing an earlier version and its
    /// entities. Extraction failures only leave the graph untouched; a
    /// failed graph write puts the previous corpus version back.
    pub async fn ingest(&self, doc_id: &str, text: &str) -> Result<IngestOutcome> {
        let doc_id = doc_key(doc_id)?;
        let items = external::call_or(
            "extract",
            self.timeout,
            self.extractor.extract(text, INGEST_INSTRUCTION),
            Vec::new,
        )
        .await;

        let previous = self.corpus.stored(doc_id).await;
        let chunks = self.corpus.ingest(doc_id, text).await?;

        let written = self.graph.write().await.replace_doc(doc_id, &items);
        if let Err(err) = written {
            self.roll_back(doc_id, previous).await;
            return Err(err);
        }

        info!(doc_id, chunks, entities = items.len(), "Document ingested");
        Ok(IngestOutcome {
            doc_id: doc_id.to_string(),
            chunks,
            entities: items.len(),
        })
    }

    /// Remove a document everywhere; `false` when it was unknown.
    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        let doc_id = doc_key(doc_id)?;
        let previous = self.corpus.stored(doc_id).await;
        let removed = self.corpus.delete(doc_id).await?;

        let written = self.graph.write().await.remove_doc(doc_id);
        if let Err(err) = written {
            if removed {
                self.roll_back(doc_id, previous).await;
            }
            return Err(err);
        }
        Ok(removed)
    }

    async fn roll_back(&self, doc_id: &str, previous: Option<StoredDoc>) {
        match self.corpus.restore(doc_id, previous).await {
            Ok(()) => warn!(doc_id, "Entity graph write failed, corpus change reverted"),
            Err(err) => error!(doc_id, "Entity graph write failed and corpus revert failed: {}", err),
        }
    }
}

/// Trimmed, non-empty document id shared by the corpus and the graph.
fn doc_key(doc_id: &str) -> Result<&str> {
    let key = doc_id.trim();
    if key.is_empty() {
        return Err(Error::InvalidArgument("doc_id must not be empty".to_string()));
    }
    Ok(key)
}

/// Counts reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub documents: usize,
    pub chunks: usize,
    pub entities: usize,
    pub llm: String,
    pub embedder: String,
    pub data_dir: String,
}

pub struct RagSystem {
    config: Config,
    llm: Arc<dyn CompletionService>,
    corpus: Arc<Corpus>,
    graph: Arc<RwLock<EntityGraph>>,
    ingestor: Ingestor,
    orchestrator: Arc<Orchestrator>,
}

impl RagSystem {
    /// Validate `config` and build the system with its configured
    /// completion backend. Refuses to start without a provider.
    pub fn open(config: Config) -> Result<Self> {
        let llm = LlmClient::from_config(&config.llm, config.request_timeout)?;
        Self::with_llm(config, Arc::new(llm))
    }

    /// Build around an explicit completion backend; the data directory is
    /// still taken from `config`.
    pub fn with_llm(config: Config, llm: Arc<dyn CompletionService>) -> Result<Self> {
        config.validate()?;
        let timeout = config.request_timeout;

        let embedder = embedder_from_config(&config.embedding, timeout)?;
        let chunker = Chunker::new(
            config.retrieval.chunk_min_chars,
            config.retrieval.chunk_max_chars,
        );
        let corpus = Arc::new(Corpus::open(&config.data_dir, embedder, chunker, timeout)?);
        let graph = Arc::new(RwLock::new(EntityGraph::open(&config.data_dir)?));
        let extractor: Arc<dyn EntityExtraction> =
            Arc::new(LlmExtractor::new(llm.clone(), timeout));

        let reranker = config
            .retrieval
            .rerank
            .then(|| Reranker::new(llm.clone(), timeout));
        let orchestrator = Orchestrator::new(
            Router::new(llm.clone(), config.agent.routing, timeout),
            RetrievalAgent::new(
                corpus.clone(),
                graph.clone(),
                extractor.clone(),
                reranker,
                timeout,
            ),
            QueryRewriter::new(llm.clone(), timeout),
            Synthesizer::new(llm.clone(), timeout),
            LoopSettings::from_config(&config),
        );

        info!(
            llm = llm.name(),
            embedder = corpus.embedder().name(),
            data_dir = %config.data_dir.display(),
            "System ready"
        );

        Ok(Self {
            ingestor: Ingestor::new(corpus.clone(), graph.clone(), extractor, timeout),
            config,
            llm,
            corpus,
            graph,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn llm(&self) -> &Arc<dyn CompletionService> {
        &self.llm
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn graph(&self) -> &Arc<RwLock<EntityGraph>> {
        &self.graph
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub async fn ingest(&self, doc_id: &str, text: &str) -> Result<IngestOutcome> {
        self.ingestor.ingest(doc_id, text).await
    }

    /// Ingest a file, or every `.md`/`.txt` file under a directory. A file's
    /// doc_id defaults to its stem; directory entries use their relative
    /// path without extension.
    pub async fn ingest_path(&self, path: &Path, doc_id: Option<&str>) -> Result<Vec<IngestOutcome>> {
        if path.is_file() {
            let text = tokio::fs::read_to_string(path).await?;
            let doc_id = match doc_id {
                Some(id) => id.to_string(),
                None => path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!("no file name in {}", path.display()))
                    })?,
            };
            return Ok(vec![self.ingest(&doc_id, &text).await?]);
        }

        if !path.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "{} is neither a file nor a directory",
                path.display()
            )));
        }

        let files = read_text_files(path.to_path_buf(), usize::MAX).await?;
        let mut outcomes = Vec::with_capacity(files.len());
        for record in files {
            if record.text.trim().is_empty() {
                warn!(file = %record.id, "Skipping empty file");
                continue;
            }
            let doc_id = match doc_id {
                Some(prefix) => format!("{}/{}", prefix, record.id),
                None => record.id,
            };
            outcomes.push(self.ingest(&doc_id, &record.text).await?);
        }
        Ok(outcomes)
    }

    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        self.ingestor.delete(doc_id).await
    }

    pub async fn list_docs(&self) -> Vec<DocSummary> {
        self.corpus.list_docs().await
    }

    pub async fn status(&self) -> SystemStatus {
        SystemStatus {
            documents: self.corpus.len().await,
            chunks: self.corpus.chunk_count().await,
            entities: self.graph.read().await.len(),
            llm: self.llm.name().to_string(),
            embedder: self.corpus.embedder().name().to_string(),
            data_dir: self.config.data_dir.display().to_string(),
        }
    }

    /// Plain hybrid search, no agent loop.
    pub async fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        self.corpus.search(query, k).await
    }

    pub async fn ask(&self, query: &str, options: AskOptions) -> AgentAnswer {
        self.orchestrator.run_with(query, options).await
    }

    pub fn ask_stream(&self, query: &str, options: AskOptions) -> mpsc::Receiver<AgentEvent> {
        self.orchestrator.stream_with(query, options)
    }

    /// Sync manager over `sources`, writing through this system's ingestor.
    pub fn sync_manager(&self, sources: Vec<Arc<dyn DataSource>>) -> SyncManager {
        SyncManager::new(sources, self.ingestor.clone(), &self.config.sync)
    }
}
