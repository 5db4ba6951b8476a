//! Query rewriting after a weak search.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::evaluator::REWRITE_BELOW_RELEVANCE;
use super::types::{AgentState, SearchResult};
use crate::external;
use crate::integrations::CompletionService;
use crate::prompts::Prompt;
use crate::{Error, Result};

/// Appended to the original query when the model echoes the current one.
pub const STAGNATION_SUFFIXES: [&str; 2] =
    ["synonyms and alternate phrasing", "related terms and context"];
/// Appended to the original query when the rewrite call fails.
pub const ELABORATION_SUFFIXES: [&str; 2] = ["detailed explanation", "background and examples"];

const FEW_RESULTS: usize = 3;

/// What went wrong with the last search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    LowRelevance,
    FewResults,
    LowConfidence,
}

impl Shortfall {
    pub fn of(result: &SearchResult) -> Self {
        if result.relevance_score < REWRITE_BELOW_RELEVANCE {
            Shortfall::LowRelevance
        } else if result.content.len() < FEW_RESULTS {
            Shortfall::FewResults
        } else {
            Shortfall::LowConfidence
        }
    }

    fn problem(&self) -> &'static str {
        match self {
            Shortfall::LowRelevance => "the results barely mention the query terms",
            Shortfall::FewResults => "too few results were found",
            Shortfall::LowConfidence => "the results are not convincing",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Shortfall::LowRelevance => "Clarify the key terms and remove ambiguity.",
            Shortfall::FewResults => "Add synonyms and closely related terms.",
            Shortfall::LowConfidence => "Simplify the query to its essential terms.",
        }
    }
}

pub struct QueryRewriter {
    llm: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// New query text; always differs from `state.current_query`.
    pub async fn rewrite(&self, state: &AgentState, last: &SearchResult) -> String {
        let shortfall = Shortfall::of(last);
        let system = Prompt::Rewriter.system();
        let user = format!(
            "Original question: {}\nQuery: {}\nProblem: {}\nInstruction: {}",
            state.original_query,
            state.current_query,
            shortfall.problem(),
            shortfall.instruction()
        );

        let reply = external::guarded("rewrite", self.timeout, self.llm.complete(&system, &user))
            .await
            .and_then(|reply| clean_reply(&reply));

        let rewritten = match reply {
            Ok(candidate) if !same_query(&candidate, &state.current_query) => candidate,
            Ok(_) => {
                debug!("Rewrite echoed the current query");
                with_suffix(state, &STAGNATION_SUFFIXES)
            }
            Err(err) => external::or_fallback("rewrite", Err(err), || {
                with_suffix(state, &ELABORATION_SUFFIXES)
            }),
        };

        info!(?shortfall, from = %state.current_query, to = %rewritten, "Query rewritten");
        rewritten
    }
}

fn same_query(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// First non-empty line, without quotes or a leading `Query:` label.
fn clean_reply(reply: &str) -> Result<String> {
    let line = reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let line = line
        .strip_prefix("Query:")
        .or_else(|| line.strip_prefix("query:"))
        .unwrap_or(line);
    let cleaned = line.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');

    if cleaned.trim().is_empty() {
        return Err(Error::InvalidArgument("empty rewrite".to_string()));
    }
    Ok(cleaned.trim().to_string())
}

/// Original query plus the first suffix that yields something new.
fn with_suffix(state: &AgentState, suffixes: &[&str]) -> String {
    suffixes
        .iter()
        .map(|suffix| format!("{} {}", state.original_query.trim(), suffix))
        .find(|candidate| !same_query(candidate, &state.current_query))
        .unwrap_or_else(|| format!("{} {}", state.current_query.trim(), suffixes[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::SearchMetadata;
    use crate::integrations::OfflineLlm;
    use crate::retrieval::Strategy;
    use async_trait::async_trait;

    struct Reply(&'static str);

    #[async_trait]
    impl CompletionService for Reply {
        fn name(&self) -> &str {
            "reply"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Down;

    #[async_trait]
    impl CompletionService for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(Error::Timeout("rewrite".into()))
        }
    }

    fn weak() -> SearchResult {
        SearchResult {
            content: Vec::new(),
            strategy: Strategy::Hybrid,
            relevance_score: 0.1,
            confidence: 0.1,
            metadata: SearchMetadata::default(),
        }
    }

    fn rewriter(llm: Arc<dyn CompletionService>) -> QueryRewriter {
        QueryRewriter::new(llm, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn uses_model_rewrite() {
        let state = AgentState::new("acme profit", 0.7, 5);
        let rewritten = rewriter(Arc::new(Reply("\"ACME quarterly earnings\"\n")))
            .rewrite(&state, &weak())
            .await;
        assert_eq!(rewritten, "ACME quarterly earnings");
    }

    #[tokio::test]
    async fn echo_never_stagnates() {
        let rewriter = rewriter(Arc::new(OfflineLlm));
        let mut state = AgentState::new("acme profit", 0.7, 5);

        for _ in 0..4 {
            let before = state.current_query.clone();
            let after = rewriter.rewrite(&state, &weak()).await;
            assert_ne!(after.to_lowercase(), before.to_lowercase());
            state.current_query = after;
        }
    }

    #[tokio::test]
    async fn case_only_change_counts_as_echo() {
        let state = AgentState::new("acme profit", 0.7, 5);
        let rewritten = rewriter(Arc::new(Reply("ACME PROFIT")))
            .rewrite(&state, &weak())
            .await;
        assert_eq!(rewritten, "acme profit synonyms and alternate phrasing");
    }

    #[tokio::test]
    async fn failure_appends_elaboration() {
        let state = AgentState::new("acme profit", 0.7, 5);
        let rewritten = rewriter(Arc::new(Down)).rewrite(&state, &weak()).await;
        assert_eq!(rewritten, "acme profit detailed explanation");

        let empty = rewriter(Arc::new(Reply("   \n"))).rewrite(&state, &weak()).await;
        assert_eq!(empty, "acme profit detailed explanation");
    }

    #[test]
    fn shortfall_classification() {
        let mut result = weak();
        assert_eq!(Shortfall::of(&result), Shortfall::LowRelevance);
        result.relevance_score = 0.6;
        assert_eq!(Shortfall::of(&result), Shortfall::FewResults);
    }

    #[test]
    fn clean_reply_strips_label() {
        assert_eq!(clean_reply("Query: acme revenue").unwrap(), "acme revenue");
        assert!(clean_reply("\"\"").is_err());
    }
}
