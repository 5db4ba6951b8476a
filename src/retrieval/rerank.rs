//! Completion-model reranking of fused candidates, in small batches.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::SearchHit;
use crate::external;
use crate::integrations::CompletionService;
use crate::prompts::Prompt;

/// Candidate lists this short are returned untouched.
pub const MIN_CANDIDATES: usize = 4;
/// Only the first candidates are reranked; the rest keep their place after them.
pub const MAX_CANDIDATES: usize = 10;
pub const BATCH_SIZE: usize = 5;
pub const SNIPPET_CHARS: usize = 200;

static ORDINAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("ordinal regex is valid"));

pub struct Reranker {
    llm: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(llm: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Reorder `candidates`. Never drops one and never fails: a batch whose
    /// call fails keeps its input order.
    pub async fn rerank(&self, query: &str, candidates: Vec<SearchHit>) -> Vec<SearchHit> {
        if candidates.len() < MIN_CANDIDATES {
            return candidates;
        }

        let mut head = candidates;
        let tail = head.split_off(head.len().min(MAX_CANDIDATES));

        let mut reranked = Vec::with_capacity(head.len() + tail.len());
        let mut remaining = head.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<SearchHit> = remaining.by_ref().take(BATCH_SIZE).collect();
            reranked.extend(self.rerank_batch(query, batch).await);
        }
        reranked.extend(tail);
        reranked
    }

    async fn rerank_batch(&self, query: &str, batch: Vec<SearchHit>) -> Vec<SearchHit> {
        let system = Prompt::Reranker.system();
        let user = batch_prompt(query, &batch);

        let reply = external::guarded(
            "rerank",
            self.timeout,
            self.llm.complete(&system, &user),
        )
        .await;

        let order = external::or_fallback(
            "rerank",
            reply.map(|text| parse_order(&text, batch.len())),
            || (0..batch.len()).collect(),
        );
        debug!(?order, "Rerank batch order");

        let mut slots: Vec<Option<SearchHit>> = batch.into_iter().map(Some).collect();
        order
            .into_iter()
            .filter_map(|idx| slots.get_mut(idx).and_then(Option::take))
            .collect()
    }
}

fn batch_prompt(query: &str, batch: &[SearchHit]) -> String {
    let mut prompt = format!("Question: {}\n\nSnippets:\n", query);
    for (idx, hit) in batch.iter().enumerate() {
        let snippet: String = hit.text.chars().take(SNIPPET_CHARS).collect();
        let snippet = snippet.replace('\n', " ");
        prompt.push_str(&format!("[{}] {}\n", idx + 1, snippet));
    }
    prompt.push_str("\nRanking:");
    prompt
}

/// 0-based permutation of `len` items from a reply listing 1-based labels.
/// Unknown and repeated labels are ignored; unlisted items follow in
/// their original order.
pub fn parse_order(reply: &str, len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::with_capacity(len);
    for m in ORDINAL_RE.find_iter(reply) {
        let Ok(label) = m.as_str().parse::<usize>() else {
            continue;
        };
        if label == 0 || label > len {
            continue;
        }
        let idx = label - 1;
        if !order.contains(&idx) {
            order.push(idx);
        }
    }
    for idx in 0..len {
        if !order.contains(&idx) {
            order.push(idx);
        }
    }
    order
}
