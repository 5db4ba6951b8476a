//! Executes one strategy and scores what came back.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::{SearchMetadata, SearchResult};
use crate::entities::{EntityExtraction, EntityGraph, QUERY_INSTRUCTION};
use crate::external;
use crate::retrieval::tokenizer::unique_terms;
use crate::retrieval::rerank::{BATCH_SIZE, MAX_CANDIDATES, MIN_CANDIDATES};
use crate::retrieval::{Corpus, Reranker, SearchHit, SearchMode, Strategy};
use crate::Result;

/// Query terms shorter than this are ignored by the relevance score.
pub const MIN_TERM_CHARS: usize = 3;
/// Result count at which confidence stops growing.
pub const FULL_CONFIDENCE_HITS: usize = 5;

pub fn base_confidence(strategy: Strategy) -> f32 {
    match strategy {
        Strategy::Hybrid => 0.8,
        Strategy::Entities => 0.9,
        Strategy::Vector => 0.7,
        Strategy::Bm25 => 0.6,
    }
}

/// `base(strategy) · min(n / 5, 1)`.
pub fn confidence(strategy: Strategy, hits: usize) -> f32 {
    let scale = (hits as f32 / FULL_CONFIDENCE_HITS as f32).min(1.0);
    base_confidence(strategy) * scale
}

/// Matched (term, hit) pairs over `terms × hits`, in `[0, 1]`.
pub fn relevance(query: &str, hits: &[SearchHit]) -> f32 {
    let terms = unique_terms(query, MIN_TERM_CHARS);
    if terms.is_empty() || hits.is_empty() {
        return 0.0;
    }

    let matched: usize = hits
        .iter()
        .map(|hit| {
            let text = hit.text.to_lowercase();
            terms.iter().filter(|term| text.contains(term.as_str())).count()
        })
        .sum();

    (matched as f32 / (terms.len() * hits.len()) as f32).clamp(0.0, 1.0)
}

pub struct RetrievalAgent {
    corpus: Arc<Corpus>,
    graph: Arc<RwLock<EntityGraph>>,
    extractor: Arc<dyn EntityExtraction>,
    reranker: Option<Reranker>,
    timeout: Duration,
}

/// Most deadline-bounded calls one retrieval can make: query embeddings,
/// entity extraction and rerank batches. The retrieval as a whole gets
/// one deadline per call plus one.
pub fn external_calls(strategy: Strategy, k: usize, rerank: bool) -> u32 {
    let lookups = match strategy {
        Strategy::Bm25 => 0,
        Strategy::Hybrid | Strategy::Vector => 1,
        // extraction, filtered search, unfiltered fallback
        Strategy::Entities => 3,
    };
    let batches = if rerank && k >= MIN_CANDIDATES {
        k.min(MAX_CANDIDATES).div_ceil(BATCH_SIZE)
    } else {
        0
    };
    (lookups + batches) as u32
}

/// Hits plus what the entity path learned on the way.
struct Retrieved {
    hits: Vec<SearchHit>,
    executed: Strategy,
    entities: Vec<String>,
    allowed_docs: Option<usize>,
    filter_fallback: bool,
}

impl RetrievalAgent {
    pub fn new(
        corpus: Arc<Corpus>,
        graph: Arc<RwLock<EntityGraph>>,
        extractor: Arc<dyn EntityExtraction>,
        reranker: Option<Reranker>,
        timeout: Duration,
    ) -> Self {
        Self {
            corpus,
            graph,
            extractor,
            reranker,
            timeout,
        }
    }

    /// Run `strategy` for `query`. Never fails: an error or an expired
    /// deadline gives an empty result with the error in its metadata.
    pub async fn execute(&self, query: &str, strategy: Strategy, k: usize) -> SearchResult {
        let started = Instant::now();
        let limit = self.timeout * (external_calls(strategy, k, self.reranker.is_some()) + 1);
        let outcome = external::guarded("retrieval", limit, self.retrieve(query, strategy, k)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let retrieved = match outcome {
            Ok(retrieved) => retrieved,
            Err(err) => {
                warn!(%strategy, "Retrieval failed: {}", err);
                return SearchResult::failed(strategy, query, latency_ms, err.to_string());
            }
        };

        let relevance_score = relevance(query, &retrieved.hits);
        let confidence = confidence(retrieved.executed, retrieved.hits.len());
        debug!(
            %strategy,
            hits = retrieved.hits.len(),
            relevance_score,
            confidence,
            latency_ms,
            "Search completed"
        );

        SearchResult {
            content: retrieved.hits,
            strategy,
            relevance_score,
            confidence,
            metadata: SearchMetadata {
                query: query.to_string(),
                latency_ms,
                executed: Some(retrieved.executed),
                matched_entities: retrieved.entities,
                allowed_docs: retrieved.allowed_docs,
                filter_fallback: retrieved.filter_fallback,
                error: None,
            },
        }
    }

    async fn retrieve(&self, query: &str, strategy: Strategy, k: usize) -> Result<Retrieved> {
        let mut retrieved = match strategy {
            Strategy::Hybrid => self.plain(query, k, SearchMode::Hybrid, strategy).await,
            Strategy::Vector => self.plain(query, k, SearchMode::Dense, strategy).await,
            Strategy::Bm25 => self.plain(query, k, SearchMode::Sparse, strategy).await,
            Strategy::Entities => self.by_entities(query, k).await,
        };

        for hit in &mut retrieved.hits {
            hit.strategy = strategy;
        }
        if let Some(reranker) = &self.reranker {
            retrieved.hits = reranker.rerank(query, retrieved.hits).await;
        }
        Ok(retrieved)
    }

    async fn plain(&self, query: &str, k: usize, mode: SearchMode, executed: Strategy) -> Retrieved {
        Retrieved {
            hits: self.corpus.search_mode(query, k, mode, None).await,
            executed,
            entities: Vec::new(),
            allowed_docs: None,
            filter_fallback: false,
        }
    }

    async fn by_entities(&self, query: &str, k: usize) -> Retrieved {
        let items = external::call_or(
            "extract",
            self.timeout,
            self.extractor.extract(query, QUERY_INSTRUCTION),
            Vec::new,
        )
        .await;
        let entities: Vec<String> = items.into_iter().map(|item| item.text).collect();

        if entities.is_empty() {
            debug!("No entities in query, degrading to HYBRID");
            return self.plain(query, k, SearchMode::Hybrid, Strategy::Hybrid).await;
        }

        let (allowed, per_entity) = {
            let graph = self.graph.read().await;
            let per_entity: Vec<(String, BTreeSet<String>)> = entities
                .iter()
                .map(|entity| (entity.clone(), graph.filter_docs(std::slice::from_ref(entity))))
                .collect();
            (graph.filter_docs(&entities), per_entity)
        };

        let mut filter_fallback = false;
        let mut hits = if allowed.is_empty() {
            Vec::new()
        } else {
            self.corpus
                .search_mode(query, k, SearchMode::Hybrid, Some(&allowed))
                .await
        };
        if hits.is_empty() {
            filter_fallback = !allowed.is_empty();
            hits = self.corpus.search(query, k).await;
        }

        for hit in &mut hits {
            hit.matched_entities = per_entity
                .iter()
                .filter(|(_, docs)| docs.contains(&hit.doc_id))
                .map(|(entity, _)| entity.clone())
                .collect();
        }

        Retrieved {
            hits,
            executed: Strategy::Entities,
            entities,
            allowed_docs: (!allowed.is_empty()).then_some(allowed.len()),
            filter_fallback,
        }
    }
}
