//! Per-query state and the values the agents exchange.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retrieval::{SearchHit, Strategy};

/// Outcome of one iteration's search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: Vec<SearchHit>,
    /// Strategy the router chose.
    pub strategy: Strategy,
    pub relevance_score: f32,
    pub confidence: f32,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Query text this search ran with.
    pub query: String,
    pub latency_ms: u64,
    /// Strategy actually executed (ENTITIES degrades to HYBRID).
    pub executed: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_entities: Vec<String>,
    /// Size of the entity filter, when one was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_docs: Option<usize>,
    /// Filtered search was empty, so the unfiltered one was used.
    #[serde(default)]
    pub filter_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResult {
    /// Empty result carrying the failure.
    pub fn failed(strategy: Strategy, query: &str, latency_ms: u64, error: String) -> Self {
        Self {
            content: Vec::new(),
            strategy,
            relevance_score: 0.0,
            confidence: 0.0,
            metadata: SearchMetadata {
                query: query.to_string(),
                latency_ms,
                error: Some(error),
                ..SearchMetadata::default()
            },
        }
    }
}

/// Evaluation verdict on the latest search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Continue,
    RewriteQuery,
    ChangeStrategy,
    Sufficient,
    /// Every avenue exhausted without a single hit.
    Failed,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Continue => "CONTINUE",
            Decision::RewriteQuery => "REWRITE_QUERY",
            Decision::ChangeStrategy => "CHANGE_STRATEGY",
            Decision::Sufficient => "SUFFICIENT",
            Decision::Failed => "FAILED",
        }
    }

    /// Ends the loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::Sufficient | Decision::Failed)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one orchestrator run.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub query_id: Uuid,
    pub original_query: String,
    pub current_query: String,
    pub iteration: usize,
    pub strategies_tried: BTreeSet<Strategy>,
    pub results_history: Vec<SearchResult>,
    pub confidence_threshold: f32,
    pub max_iterations: usize,
}

impl AgentState {
    pub fn new(query: &str, confidence_threshold: f32, max_iterations: usize) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            original_query: query.to_string(),
            current_query: query.to_string(),
            iteration: 0,
            strategies_tried: BTreeSet::new(),
            results_history: Vec::new(),
            confidence_threshold,
            max_iterations,
        }
    }

    pub fn all_strategies_tried(&self) -> bool {
        Strategy::ALL
            .iter()
            .all(|s| self.strategies_tried.contains(s))
    }

    /// Hits across the whole history.
    pub fn total_hits(&self) -> usize {
        self.results_history.iter().map(|r| r.content.len()).sum()
    }
}

/// Per-strategy performance in an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub runs: usize,
    pub hits: usize,
    pub mean_confidence: f32,
    pub mean_relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub mean_confidence: f32,
    pub total_iterations: usize,
    pub strategies: BTreeMap<Strategy, StrategyStats>,
    pub search_latency_ms: u64,
    pub final_query: String,
    pub terminal_decision: Decision,
}

impl AnswerMetadata {
    pub fn from_state(state: &AgentState, terminal_decision: Decision) -> Self {
        let history = &state.results_history;
        let mean_confidence = if history.is_empty() {
            0.0
        } else {
            history.iter().map(|r| r.confidence).sum::<f32>() / history.len() as f32
        };

        let mut strategies: BTreeMap<Strategy, StrategyStats> = BTreeMap::new();
        for result in history {
            let stats = strategies.entry(result.strategy).or_default();
            stats.runs += 1;
            stats.hits += result.content.len();
            stats.mean_confidence += result.confidence;
            stats.mean_relevance += result.relevance_score;
        }
        for stats in strategies.values_mut() {
            stats.mean_confidence /= stats.runs as f32;
            stats.mean_relevance /= stats.runs as f32;
        }

        Self {
            mean_confidence,
            total_iterations: state.iteration,
            strategies,
            search_latency_ms: history.iter().map(|r| r.metadata.latency_ms).sum(),
            final_query: state.current_query.clone(),
            terminal_decision,
        }
    }
}

/// Structured answer; always produced, even when every stage failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub query_id: Uuid,
    pub answer: String,
    /// Cited doc_ids, first-seen order.
    pub citations: Vec<String>,
    pub metadata: AnswerMetadata,
}

/// Phase transitions of a streamed run, in loop order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    IterationStarted {
        iteration: usize,
    },
    StrategyChosen {
        iteration: usize,
        strategy: Strategy,
    },
    SearchCompleted {
        iteration: usize,
        strategy: Strategy,
        hits: usize,
        relevance_score: f32,
        confidence: f32,
    },
    EvaluationDecided {
        iteration: usize,
        decision: Decision,
    },
    QueryRewritten {
        iteration: usize,
        query: String,
    },
    SynthesisStarted {
        evidence: usize,
    },
    AnswerDelta {
        text: String,
    },
    SynthesisCompleted {
        answer: AgentAnswer,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(strategy: Strategy, hits: usize, confidence: f32, latency_ms: u64) -> SearchResult {
        let content = (0..hits)
            .map(|i| SearchHit {
                chunk_id: format!("d{i}#0"),
                doc_id: format!("d{i}"),
                text: String::new(),
                score: 0.0,
                strategy,
                matched_entities: Vec::new(),
            })
            .collect();
        SearchResult {
            content,
            strategy,
            relevance_score: 0.5,
            confidence,
            metadata: SearchMetadata {
                latency_ms,
                ..SearchMetadata::default()
            },
        }
    }

    #[test]
    fn metadata_aggregates_history() {
        let mut state = AgentState::new("q", 0.7, 5);
        state.iteration = 3;
        state.results_history = vec![
            result(Strategy::Hybrid, 2, 0.4, 10),
            result(Strategy::Vector, 0, 0.0, 5),
            result(Strategy::Hybrid, 4, 0.6, 7),
        ];

        let meta = AnswerMetadata::from_state(&state, Decision::Sufficient);
        assert!((meta.mean_confidence - (1.0 / 3.0)).abs() < 1e-6);
        assert_eq!(meta.total_iterations, 3);
        assert_eq!(meta.search_latency_ms, 22);
        let hybrid = &meta.strategies[&Strategy::Hybrid];
        assert_eq!(hybrid.runs, 2);
        assert_eq!(hybrid.hits, 6);
        assert!((hybrid.mean_confidence - 0.5).abs() < 1e-6);
        assert_eq!(meta.strategies[&Strategy::Vector].runs, 1);
    }

    #[test]
    fn empty_history_has_zero_confidence() {
        let state = AgentState::new("q", 0.7, 5);
        let meta = AnswerMetadata::from_state(&state, Decision::Failed);
        assert_eq!(meta.mean_confidence, 0.0);
        assert!(meta.strategies.is_empty());
    }

    #[test]
    fn decision_terminal_states() {
        assert!(Decision::Sufficient.is_terminal());
        assert!(Decision::Failed.is_terminal());
        assert!(!Decision::RewriteQuery.is_terminal());
        assert_eq!(
            serde_json::to_string(&Decision::ChangeStrategy).unwrap(),
            "\"CHANGE_STRATEGY\""
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = AgentEvent::StrategyChosen {
            iteration: 1,
            strategy: Strategy::Hybrid,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "strategy_chosen");
        assert_eq!(json["strategy"], "HYBRID");
    }

    #[test]
    fn answer_serializes_strategy_keys() {
        let mut state = AgentState::new("q", 0.7, 5);
        state.iteration = 1;
        state.results_history = vec![result(Strategy::Bm25, 1, 0.1, 1)];
        let answer = AgentAnswer {
            query_id: state.query_id,
            answer: "a".to_string(),
            citations: vec!["d0".to_string()],
            metadata: AnswerMetadata::from_state(&state, Decision::Sufficient),
        };
        let json = serde_json::to_value(&answer).unwrap();
        assert!(json["metadata"]["strategies"]["BM25"].is_object());
    }

    #[test]
    fn all_strategies_tried() {
        let mut state = AgentState::new("q", 0.7, 5);
        assert!(!state.all_strategies_tried());
        state.strategies_tried.extend(Strategy::ALL);
        assert!(state.all_strategies_tried());
    }
}
