//! Agent loop over the retrieval engine.
//!
//! [`Orchestrator`] drives one question through a bounded cycle: the
//! [`Router`] picks a strategy, the [`RetrievalAgent`] runs it, the
//! evaluator decides whether to stop, rewrite the query with the
//! [`QueryRewriter`], or switch strategy. The [`Synthesizer`] then writes
//! a cited answer from every hit collected on the way.

pub mod evaluator;
pub mod orchestrator;
pub mod retriever;
pub mod rewriter;
pub mod router;
pub mod synthesizer;
pub mod types;

pub use evaluator::evaluate;
pub use orchestrator::{AskOptions, LoopSettings, Orchestrator};
pub use retriever::RetrievalAgent;
pub use rewriter::QueryRewriter;
pub use router::Router;
pub use synthesizer::Synthesizer;
pub use types::{
    AgentAnswer, AgentEvent, AgentState, AnswerMetadata, Decision, SearchMetadata, SearchResult,
    StrategyStats,
};
