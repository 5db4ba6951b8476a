//! Hybrid retrieval engine.
//!
//! Documents are chunked ([`chunker`]), every chunk is indexed twice,
//! lexically ([`sparse`], BM25) and semantically ([`dense`], cosine over
//! embeddings), and a query's two ranklists are merged with reciprocal
//! rank fusion ([`fusion`]). [`Corpus`] owns both indices behind one
//! read/write lock and persists them through [`store`]. [`rerank`] can
//! reorder the fused candidates with the completion model.

pub mod chunker;
pub mod corpus;
pub mod dense;
pub mod fusion;
pub mod rerank;
pub mod sparse;
pub mod store;
pub mod tokenizer;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use chunker::{Chunk, Chunker};
pub use corpus::{Corpus, DocSummary, Document, SearchMode, StoredDoc};
pub use fusion::{rrf_fuse, RRF_K};
pub use rerank::Reranker;

/// Retrieval approach for one agent iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    Hybrid,
    Entities,
    Vector,
    Bm25,
}

impl Strategy {
    /// Router preference order.
    pub const ALL: [Strategy; 4] = [
        Strategy::Hybrid,
        Strategy::Entities,
        Strategy::Vector,
        Strategy::Bm25,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Hybrid => "HYBRID",
            Strategy::Entities => "ENTITIES",
            Strategy::Vector => "VECTOR",
            Strategy::Bm25 => "BM25",
        }
    }

    /// Parse a strategy name; accepts the long form `ENTITY_EXTRACTION`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "HYBRID" => Some(Strategy::Hybrid),
            "ENTITIES" | "ENTITY" | "ENTITY_EXTRACTION" => Some(Strategy::Entities),
            "VECTOR" | "DENSE" => Some(Strategy::Vector),
            "BM25" | "SPARSE" | "KEYWORD" => Some(Strategy::Bm25),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub score: f64,
    pub strategy: Strategy,
    /// Query entities that led to this hit (ENTITIES strategy only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_entities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parse_accepts_aliases() {
        assert_eq!(Strategy::parse(" hybrid "), Some(Strategy::Hybrid));
        assert_eq!(Strategy::parse("ENTITY_EXTRACTION"), Some(Strategy::Entities));
        assert_eq!(Strategy::parse("bm25"), Some(Strategy::Bm25));
        assert_eq!(Strategy::parse("vector"), Some(Strategy::Vector));
        assert_eq!(Strategy::parse("graph"), None);
    }

    #[test]
    fn strategy_serializes_as_upper_case() {
        let json = serde_json::to_string(&Strategy::Bm25).unwrap();
        assert_eq!(json, "\"BM25\"");
        let json = serde_json::to_string(&Strategy::Entities).unwrap();
        assert_eq!(json, "\"ENTITIES\"");
    }

    #[test]
    fn preference_order_is_fixed() {
        assert_eq!(
            Strategy::ALL,
            [Strategy::Hybrid, Strategy::Entities, Strategy::Vector, Strategy::Bm25]
        );
    }
}
