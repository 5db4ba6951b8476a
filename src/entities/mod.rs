//! Entity extraction and the entity → document index.
//!
//! Extraction runs at ingestion time to fill the [`EntityGraph`] and at
//! query time (ENTITIES strategy) to turn a question into an allowed
//! document set.

pub mod extractor;
pub mod graph;

pub use extractor::{
    heuristic_entities, EntityExtraction, ExtractedItem, HeuristicExtractor, LlmExtractor,
};
pub use graph::EntityGraph;

/// Instruction passed with document text at ingestion.
pub const INGEST_INSTRUCTION: &str =
    "List the people, organizations, places, products, dates and amounts mentioned.";

/// Instruction passed with a user question.
pub const QUERY_INSTRUCTION: &str =
    "List the named entities the question asks about.";
