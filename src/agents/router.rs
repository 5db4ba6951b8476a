//! Strategy selection.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::types::AgentState;
use crate::config::RoutingMode;
use crate::external;
use crate::integrations::CompletionService;
use crate::prompts::Prompt;
use crate::retrieval::Strategy;
use crate::{Error, Result};

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("word regex is valid"));

/// Picks the retrieval strategy for the next iteration.
pub struct Router {
    llm: Arc<dyn CompletionService>,
    mode: RoutingMode,
    timeout: Duration,
}

impl Router {
    pub fn new(llm: Arc<dyn CompletionService>, mode: RoutingMode, timeout: Duration) -> Self {
        Self { llm, mode, timeout }
    }

    /// A suggested strategy wins unless it was already tried; otherwise the
    /// first untried one in preference order, HYBRID once all were tried.
    /// A failed or unreadable model reply means HYBRID.
    pub async fn choose(&self, query: &str, state: &AgentState) -> Strategy {
        let suggestion = match self.mode {
            RoutingMode::Heuristic => heuristic_suggestion(query),
            RoutingMode::Model => {
                let reply = self.ask_model(query, state).await.map(Some);
                match external::or_fallback("router", reply, || None) {
                    Some(strategy) => Some(strategy),
                    None => return Strategy::Hybrid,
                }
            }
        };

        let strategy = pick(suggestion, state);
        debug!(?suggestion, %strategy, iteration = state.iteration, "Strategy chosen");
        strategy
    }

    async fn ask_model(&self, query: &str, state: &AgentState) -> Result<Strategy> {
        let system = Prompt::Router.system();
        let tried: Vec<&str> = state.strategies_tried.iter().map(Strategy::as_str).collect();
        let user = format!(
            "Question: {}\nAlready tried: {}",
            query,
            if tried.is_empty() {
                "none".to_string()
            } else {
                tried.join(", ")
            }
        );

        let reply =
            external::guarded("router", self.timeout, self.llm.complete(&system, &user)).await?;
        parse_strategy(&reply).ok_or_else(|| {
            Error::completion(self.llm.name(), format!("unreadable router reply: {:?}", reply))
        })
    }
}

fn pick(suggestion: Option<Strategy>, state: &AgentState) -> Strategy {
    if let Some(strategy) = suggestion {
        if !state.strategies_tried.contains(&strategy) {
            return strategy;
        }
    }
    Strategy::ALL
        .into_iter()
        .find(|s| !state.strategies_tried.contains(s))
        .unwrap_or(Strategy::Hybrid)
}

/// First strategy name mentioned in a model reply.
pub fn parse_strategy(reply: &str) -> Option<Strategy> {
    WORD_RE
        .find_iter(reply)
        .find_map(|m| Strategy::parse(m.as_str()))
}

/// ENTITIES when the query quotes a phrase or names at least two things
/// (capitalised words past the first, or tokens with digits).
pub fn heuristic_suggestion(query: &str) -> Option<Strategy> {
    if query.matches('"').count() >= 2 {
        return Some(Strategy::Entities);
    }

    let named = query
        .split_whitespace()
        .enumerate()
        .map(|(idx, raw)| (idx, raw.trim_matches(|c: char| !c.is_alphanumeric())))
        .filter(|(_, token)| !token.is_empty())
        .filter(|(idx, token)| {
            let capitalised = *idx > 0 && token.chars().next().is_some_and(char::is_uppercase);
            capitalised || token.chars().any(|c| c.is_ascii_digit())
        })
        .count();

    (named >= 2).then_some(Strategy::Entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::OfflineLlm;
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
            Err(Error::Unavailable("down".into()))
        }
    }

    fn router(llm: Arc<dyn CompletionService>, mode: RoutingMode) -> Router {
        Router::new(llm, mode, Duration::from_secs(1))
    }

    fn state_with(tried: &[Strategy]) -> AgentState {
        let mut state = AgentState::new("q", 0.7, 5);
        state.strategies_tried.extend(tried.iter().copied());
        state.iteration = tried.len();
        state
    }

    #[tokio::test]
    async fn walks_preference_order() {
        let router = router(Arc::new(OfflineLlm), RoutingMode::Heuristic);
        let query = "how much did acme earn";

        assert_eq!(router.choose(query, &state_with(&[])).await, Strategy::Hybrid);
        assert_eq!(
            router.choose(query, &state_with(&[Strategy::Hybrid])).await,
            Strategy::Entities
        );
        assert_eq!(
            router
                .choose(query, &state_with(&[Strategy::Hybrid, Strategy::Entities]))
                .await,
            Strategy::Vector
        );
        assert_eq!(
            router.choose(query, &state_with(&Strategy::ALL)).await,
            Strategy::Hybrid
        );
    }

    #[tokio::test]
    async fn named_entities_suggest_entities_strategy() {
        let router = router(Arc::new(OfflineLlm), RoutingMode::Heuristic);
        let query = "What did Alice Smith say about Globex in 2023?";
        assert_eq!(router.choose(query, &state_with(&[])).await, Strategy::Entities);
        assert_eq!(
            router.choose(query, &state_with(&[Strategy::Entities])).await,
            Strategy::Hybrid
        );
    }

    #[tokio::test]
    async fn model_suggestion_is_followed_unless_tried() {
        let router = router(Arc::new(Reply("I'd go with BM25.")), RoutingMode::Model);
        assert_eq!(router.choose("q", &state_with(&[])).await, Strategy::Bm25);
        assert_eq!(
            router.choose("q", &state_with(&[Strategy::Bm25])).await,
            Strategy::Hybrid
        );
    }

    #[tokio::test]
    async fn model_failure_means_hybrid() {
        let tried = [Strategy::Hybrid, Strategy::Entities];
        let down = router(Arc::new(Down), RoutingMode::Model);
        assert_eq!(down.choose("q", &state_with(&tried)).await, Strategy::Hybrid);

        let garbage = router(Arc::new(Reply("no idea")), RoutingMode::Model);
        assert_eq!(garbage.choose("q", &state_with(&tried)).await, Strategy::Hybrid);
    }

    #[test]
    fn parse_strategy_finds_first_name() {
        assert_eq!(parse_strategy("vector"), Some(Strategy::Vector));
        assert_eq!(
            parse_strategy("Strategy: ENTITY_EXTRACTION (names)"),
            Some(Strategy::Entities)
        );
        assert_eq!(parse_strategy("none of these"), None);
    }

    #[test]
    fn heuristic_needs_two_names_or_quotes() {
        assert_eq!(heuristic_suggestion("How much did ACME earn?"), None);
        assert_eq!(
            heuristic_suggestion("find \"quarterly report\" please"),
            Some(Strategy::Entities)
        );
        assert_eq!(
            heuristic_suggestion("revenue of ACME in Q2"),
            Some(Strategy::Entities)
        );
    }
}
