//! Decides what the loop does after each search.
//!
//! Rules, first match wins:
//!
//! 1. `confidence >= threshold`, `relevance >= 0.5` and at least 3 hits: SUFFICIENT
//! 2. iteration budget spent: SUFFICIENT
//! 3. every strategy tried: SUFFICIENT
//! 4. no hits: CHANGE_STRATEGY
//! 5. `relevance < 0.3`: REWRITE_QUERY
//! 6. `confidence < 0.4`: CHANGE_STRATEGY
//! 7. otherwise CONTINUE
//!
//! Rules 2 and 3 report FAILED instead when the whole history is empty.

use super::types::{AgentState, Decision, SearchResult};

pub const SUFFICIENT_RELEVANCE: f32 = 0.5;
pub const SUFFICIENT_HITS: usize = 3;
pub const REWRITE_BELOW_RELEVANCE: f32 = 0.3;
pub const CHANGE_BELOW_CONFIDENCE: f32 = 0.4;

pub fn evaluate(state: &AgentState, latest: &SearchResult) -> Decision {
    if latest.confidence >= state.confidence_threshold
        && latest.relevance_score >= SUFFICIENT_RELEVANCE
        && latest.content.len() >= SUFFICIENT_HITS
    {
        return Decision::Sufficient;
    }

    if state.iteration >= state.max_iterations || state.all_strategies_tried() {
        return if state.total_hits() == 0 {
            Decision::Failed
        } else {
            Decision::Sufficient
        };
    }

    if latest.content.is_empty() {
        Decision::ChangeStrategy
    } else if latest.relevance_score < REWRITE_BELOW_RELEVANCE {
        Decision::RewriteQuery
    } else if latest.confidence < CHANGE_BELOW_CONFIDENCE {
        Decision::ChangeStrategy
    } else {
        Decision::Continue
    }
}
