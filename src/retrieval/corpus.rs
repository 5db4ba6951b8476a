//! Document corpus: chunk store plus sparse and dense indices.
//!
//! All index state lives behind one `tokio::sync::RwLock`. Searches take
//! the read side; ingest and delete take the write side only after their
//! embeddings are computed, so a search never sees a half-ingested
//! document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::chunker::{Chunk, Chunker};
use super::dense::DenseIndex;
use super::fusion::{candidate_count, rrf_fuse};
use super::sparse::SparseIndex;
use super::store::{CorpusStore, Snapshot, SNAPSHOT_VERSION};
use super::{SearchHit, Strategy};
use crate::external;
use crate::integrations::EmbeddingService;
use crate::{Error, Result};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub raw_text: String,
}

/// `list_docs` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocSummary {
    pub doc_id: String,
    /// First characters of the text.
    pub preview: String,
    /// Length in characters.
    pub length: usize,
    pub chunks: usize,
}

/// Which ranklists a search consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// BM25 and dense, fused with RRF.
    Hybrid,
    /// BM25 only.
    Sparse,
    /// Dense only.
    Dense,
}

impl SearchMode {
    fn strategy(&self) -> Strategy {
        match self {
            SearchMode::Hybrid => Strategy::Hybrid,
            SearchMode::Sparse => Strategy::Bm25,
            SearchMode::Dense => Strategy::Vector,
        }
    }
}

/// One document as indexed: its chunks in position order and their vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDoc {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Default, Clone)]
struct CorpusState {
    documents: BTreeMap<String, Document>,
    /// doc_id -> its chunk ids in position order
    doc_chunks: BTreeMap<String, Vec<String>>,
    chunks: BTreeMap<String, Chunk>,
    sparse: SparseIndex,
    dense: DenseIndex,
}

impl CorpusState {
    fn remove_doc(&mut self, doc_id: &str) -> bool {
        let existed = self.documents.remove(doc_id).is_some();
        for chunk_id in self.doc_chunks.remove(doc_id).unwrap_or_default() {
            self.chunks.remove(&chunk_id);
            self.sparse.remove(&chunk_id);
            self.dense.remove(&chunk_id);
        }
        existed
    }

    fn insert_doc(&mut self, document: Document, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) {
        self.remove_doc(&document.doc_id);

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            self.sparse.insert(&chunk.chunk_id, &chunk.text);
            self.dense.insert(&chunk.chunk_id, vector);
            ids.push(chunk.chunk_id.clone());
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        self.doc_chunks.insert(document.doc_id.clone(), ids);
        self.documents.insert(document.doc_id.clone(), document);
    }

    fn stored(&self, doc_id: &str) -> Option<StoredDoc> {
        let document = self.documents.get(doc_id)?.clone();
        let ids = self.doc_chunks.get(doc_id).map(Vec::as_slice).unwrap_or_default();
        let chunks: Vec<Chunk> = ids.iter().filter_map(|id| self.chunks.get(id).cloned()).collect();
        let vectors = chunks
            .iter()
            .map(|c| self.dense.get(&c.chunk_id).cloned().unwrap_or_default())
            .collect();
        Some(StoredDoc {
            document,
            chunks,
            vectors,
        })
    }

    fn snapshot(&self, embedding_model: &str, dimension: usize) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            embedding_model: embedding_model.to_string(),
            dimension,
            documents: self.documents.values().cloned().collect(),
            chunks: self.chunks.values().cloned().collect(),
            vectors: self
                .dense
                .iter()
                .map(|(id, v)| (id.clone(), v.clone()))
                .collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = CorpusState::default();
        for document in snapshot.documents {
            state.documents.insert(document.doc_id.clone(), document);
        }

        let mut chunks = snapshot.chunks;
        chunks.sort_by(|a, b| a.doc_id.cmp(&b.doc_id).then(a.position.cmp(&b.position)));
        let mut vectors = snapshot.vectors;
        for chunk in chunks {
            if !state.documents.contains_key(&chunk.doc_id) {
                warn!(chunk_id = %chunk.chunk_id, "Dropping chunk of unknown document");
                continue;
            }
            let vector = vectors
                .remove(&chunk.chunk_id)
                .unwrap_or_else(|| vec![0.0; snapshot.dimension]);
            state.sparse.insert(&chunk.chunk_id, &chunk.text);
            state.dense.insert(&chunk.chunk_id, vector);
            state
                .doc_chunks
                .entry(chunk.doc_id.clone())
                .or_default()
                .push(chunk.chunk_id.clone());
            state.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        state
    }

    fn hit(&self, chunk_id: &str, score: f64, strategy: Strategy) -> Option<SearchHit> {
        self.chunks.get(chunk_id).map(|chunk| SearchHit {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            text: chunk.text.clone(),
            score,
            strategy,
            matched_entities: Vec::new(),
        })
    }
}

/// Shared, injectable corpus handle.
pub struct Corpus {
    state: RwLock<CorpusState>,
    embedder: Arc<dyn EmbeddingService>,
    chunker: Chunker,
    store: Option<CorpusStore>,
    embed_timeout: Duration,
}

impl Corpus {
    /// Corpus that lives only in memory.
    pub fn in_memory(embedder: Arc<dyn EmbeddingService>, chunker: Chunker) -> Self {
        Self {
            state: RwLock::new(CorpusState::default()),
            embedder,
            chunker,
            store: None,
            embed_timeout: Duration::from_secs(crate::config::DEFAULT_REQUEST_SECS),
        }
    }

    /// Corpus persisted under `data_dir`, reloaded if a snapshot exists.
    pub fn open(
        data_dir: &Path,
        embedder: Arc<dyn EmbeddingService>,
        chunker: Chunker,
        embed_timeout: Duration,
    ) -> Result<Self> {
        let store = CorpusStore::new(data_dir);
        let state = match store.load()? {
            Some(snapshot) => {
                if snapshot.dimension != embedder.dimension()
                    || snapshot.embedding_model != embedder.name()
                {
                    warn!(
                        stored_model = %snapshot.embedding_model,
                        stored_dimension = snapshot.dimension,
                        model = embedder.name(),
                        dimension = embedder.dimension(),
                        "Corpus was embedded with another model; re-ingest for dense search"
                    );
                }
                let state = CorpusState::from_snapshot(snapshot);
                info!(
                    documents = state.documents.len(),
                    chunks = state.chunks.len(),
                    "Corpus loaded"
                );
                state
            }
            None => CorpusState::default(),
        };

        Ok(Self {
            state: RwLock::new(state),
            embedder,
            chunker,
            store: Some(store),
            embed_timeout,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingService> {
        &self.embedder
    }

    /// Number of documents.
    pub async fn len(&self) -> usize {
        self.state.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.documents.is_empty()
    }

    pub async fn chunk_count(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn document(&self, doc_id: &str) -> Option<Document> {
        self.state.read().await.documents.get(doc_id).cloned()
    }

    /// Chunk, embed and index one document, replacing any previous version.
    /// Returns the number of chunks.
    pub async fn ingest(&self, doc_id: &str, text: &str) -> Result<usize> {
        self.ingest_many(vec![(doc_id.to_string(), text.to_string())])
            .await
    }

    /// Ingest several documents under one write lock and one snapshot write.
    /// Returns the total number of chunks.
    pub async fn ingest_many(&self, docs: Vec<(String, String)>) -> Result<usize> {
        let mut prepared = Vec::with_capacity(docs.len());
        for (doc_id, text) in docs {
            let doc_id = doc_id.trim().to_string();
            if doc_id.is_empty() {
                return Err(Error::InvalidArgument("doc_id must not be empty".to_string()));
            }
            if text.trim().is_empty() {
                return Err(Error::InvalidArgument(format!("document {doc_id} is empty")));
            }

            let chunks = self.chunker.chunk(&doc_id, &text);
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_chunks(&texts).await;
            prepared.push((
                Document {
                    doc_id,
                    raw_text: text,
                },
                chunks,
                vectors,
            ));
        }

        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let mut total = 0;
        for (document, chunks, vectors) in prepared {
            debug!(doc_id = %document.doc_id, chunks = chunks.len(), "Indexing document");
            total += chunks.len();
            staged.insert_doc(document, chunks, vectors);
        }
        self.persist(&staged)?;
        *state = staged;
        Ok(total)
    }

    /// Remove a document from both indices. `false` if it was unknown.
    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(doc_id) {
            return Ok(false);
        }
        let mut staged = state.clone();
        staged.remove_doc(doc_id);
        self.persist(&staged)?;
        *state = staged;
        info!(doc_id, "Document deleted");
        Ok(true)
    }

    /// The indexed form of `doc_id`, for a later [`Corpus::restore`].
    pub async fn stored(&self, doc_id: &str) -> Option<StoredDoc> {
        self.state.read().await.stored(doc_id)
    }

    /// Put `doc_id` back the way `previous` describes it; `None` removes it.
    /// Nothing is re-embedded.
    pub async fn restore(&self, doc_id: &str, previous: Option<StoredDoc>) -> Result<()> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        match previous {
            Some(doc) => staged.insert_doc(doc.document, doc.chunks, doc.vectors),
            None => {
                staged.remove_doc(doc_id);
            }
        }
        self.persist(&staged)?;
        *state = staged;
        debug!(doc_id, "Document restored");
        Ok(())
    }

    /// Cheap per-document metadata, ordered by doc_id.
    pub async fn list_docs(&self) -> Vec<DocSummary> {
        let state = self.state.read().await;
        state
            .documents
            .values()
            .map(|doc| DocSummary {
                doc_id: doc.doc_id.clone(),
                preview: doc.raw_text.chars().take(PREVIEW_CHARS).collect(),
                length: doc.raw_text.chars().count(),
                chunks: state.doc_chunks.get(&doc.doc_id).map_or(0, Vec::len),
            })
            .collect()
    }

    /// Hybrid top-`k` search.
    pub async fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        self.search_mode(query, k, SearchMode::Hybrid, None).await
    }

    /// Top-`k` search using the ranklists of `mode`, optionally restricted
    /// to `allowed_docs`.
    pub async fn search_mode(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
        allowed_docs: Option<&BTreeSet<String>>,
    ) -> Vec<SearchHit> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let query_vector = match mode {
            SearchMode::Sparse => Vec::new(),
            SearchMode::Hybrid | SearchMode::Dense => self.embed_query(query).await,
        };

        let state = self.state.read().await;
        if state.chunks.is_empty() {
            return Vec::new();
        }

        let accept = |chunk_id: &str| match allowed_docs {
            Some(allowed) => state
                .chunks
                .get(chunk_id)
                .is_some_and(|c| allowed.contains(&c.doc_id)),
            None => true,
        };
        let strategy = mode.strategy();

        let ranked: Vec<(String, f64)> = match mode {
            SearchMode::Sparse => state.sparse.search(query, k, &accept),
            SearchMode::Dense => state
                .dense
                .search(&query_vector, k, &accept)
                .into_iter()
                .map(|(id, score)| (id, score as f64))
                .collect(),
            SearchMode::Hybrid => {
                let limit = candidate_count(k);
                let sparse: Vec<String> = state
                    .sparse
                    .search(query, limit, &accept)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
                let dense: Vec<String> = state
                    .dense
                    .search(&query_vector, limit, &accept)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
                rrf_fuse(&sparse, &dense)
            }
        };

        ranked
            .into_iter()
            .take(k)
            .filter_map(|(id, score)| state.hit(&id, score, strategy))
            .collect()
    }

    async fn embed_query(&self, query: &str) -> Vec<f32> {
        let dimension = self.embedder.dimension();
        let vector = external::call_or(
            "embedding",
            self.embed_timeout,
            self.embedder.embed(query),
            || vec![0.0; dimension],
        )
        .await;
        self.checked(vector)
    }

    /// One vector per text; failures and malformed vectors become zeros.
    async fn embed_chunks(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let dimension = self.embedder.dimension();
        let vectors = external::call_or(
            "embedding",
            self.embed_timeout,
            self.embedder.embed_batch(texts),
            || vec![vec![0.0; dimension]; texts.len()],
        )
        .await;

        if vectors.len() != texts.len() {
            warn!(
                expected = texts.len(),
                got = vectors.len(),
                "Embedding count mismatch, using zero vectors"
            );
            return vec![vec![0.0; dimension]; texts.len()];
        }
        vectors.into_iter().map(|v| self.checked(v)).collect()
    }

    fn checked(&self, vector: Vec<f32>) -> Vec<f32> {
        let dimension = self.embedder.dimension();
        if vector.len() == dimension {
            vector
        } else {
            if !vector.is_empty() {
                warn!(
                    expected = dimension,
                    got = vector.len(),
                    "Embedding dimension mismatch, using zero vector"
                );
            }
            vec![0.0; dimension]
        }
    }

    fn persist(&self, state: &CorpusState) -> Result<()> {
        match &self.store {
            Some(store) => {
                store.save(&state.snapshot(self.embedder.name(), self.embedder.dimension()))
            }
            None => Ok(()),
        }
    }
}
