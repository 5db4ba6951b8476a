//! Final answer from the accumulated evidence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::types::{AgentAnswer, AgentEvent, AgentState, AnswerMetadata, Decision};
use crate::external;
use crate::integrations::CompletionService;
use crate::prompts::Prompt;
use crate::retrieval::SearchHit;
use crate::{Error, Result};

/// Unique hits passed to the writer.
pub const MAX_EVIDENCE: usize = 10;
/// Characters of each hit shown in the context block.
pub const CONTEXT_CHARS: usize = 800;

pub const NO_EVIDENCE_ANSWER: &str = "No relevant documents were found for this question.";

/// Every hit in history, deduplicated by `(doc_id, chunk_id)` in
/// first-seen order, capped at [`MAX_EVIDENCE`].
pub fn collect_evidence(state: &AgentState) -> Vec<SearchHit> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut evidence = Vec::new();
    for hit in state.results_history.iter().flat_map(|r| r.content.iter()) {
        if evidence.len() == MAX_EVIDENCE {
            break;
        }
        if seen.insert((hit.doc_id.as_str(), hit.chunk_id.as_str())) {
            evidence.push(hit.clone());
        }
    }
    evidence
}

/// Doc ids of `evidence`, first-seen order.
pub fn citations(evidence: &[SearchHit]) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    for hit in evidence {
        if !citations.contains(&hit.doc_id) {
            citations.push(hit.doc_id.clone());
        }
    }
    citations
}

/// User prompt: the question and one `[DOC id] text` line per hit.
pub fn build_prompt(query: &str, evidence: &[SearchHit]) -> String {
    let mut prompt = format!("Q: {}\n\nCONTEXT:\n", query);
    for hit in evidence {
        let text: String = hit
            .text
            .chars()
            .take(CONTEXT_CHARS)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        prompt.push_str(&format!("[DOC {}] {}\n", hit.doc_id, text));
    }
    prompt
}

fn error_answer(err: &Error, citations: &[String]) -> String {
    let mut answer = format!("Unable to generate an answer right now ({}).", err);
    if !citations.is_empty() {
        let sources: Vec<String> = citations.iter().map(|c| format!("[{}]", c)).collect();
        answer.push_str(&format!(" Relevant sources: {}", sources.join(", ")));
    }
    answer
}

pub struct Synthesizer {
    llm: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// One completion call over the evidence. Never fails: a failed call
    /// becomes an explanatory answer that keeps the citations.
    pub async fn synthesize(&self, state: &AgentState, decision: Decision) -> AgentAnswer {
        self.run(state, decision, None).await
    }

    /// As [`Synthesizer::synthesize`], forwarding answer fragments to `events`.
    pub async fn synthesize_streaming(
        &self,
        state: &AgentState,
        decision: Decision,
        events: &mpsc::Sender<AgentEvent>,
    ) -> AgentAnswer {
        self.run(state, decision, Some(events)).await
    }

    async fn run(
        &self,
        state: &AgentState,
        decision: Decision,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> AgentAnswer {
        let evidence = collect_evidence(state);
        let citations = citations(&evidence);
        if let Some(tx) = events {
            let _ = tx
                .send(AgentEvent::SynthesisStarted {
                    evidence: evidence.len(),
                })
                .await;
        }

        // `forwarded` is set once the answer's fragments already reached `events`.
        let (answer, forwarded) = if evidence.is_empty() {
            (NO_EVIDENCE_ANSWER.to_string(), false)
        } else {
            let system = Prompt::Writer.system();
            let user = build_prompt(&state.original_query, &evidence);
            let generated = match events {
                None => {
                    external::guarded("synthesis", self.timeout, self.llm.complete(&system, &user))
                        .await
                }
                Some(tx) => self.stream_answer(&system, &user, tx).await,
            };
            match generated {
                Ok(text) if !text.trim().is_empty() => (text, events.is_some()),
                Ok(_) => {
                    let err = Error::completion(self.llm.name(), "empty answer");
                    let fallback = error_answer(&err, &citations);
                    (external::or_fallback("synthesis", Err(err), || fallback), false)
                }
                Err(err) => {
                    let fallback = error_answer(&err, &citations);
                    (external::or_fallback("synthesis", Err(err), || fallback), false)
                }
            }
        };

        if let Some(tx) = events {
            if !forwarded {
                let _ = tx
                    .send(AgentEvent::AnswerDelta {
                        text: answer.clone(),
                    })
                    .await;
            }
        }

        info!(
            query_id = %state.query_id,
            citations = citations.len(),
            evidence = evidence.len(),
            %decision,
            "Answer synthesized"
        );

        AgentAnswer {
            query_id: state.query_id,
            answer,
            citations,
            metadata: AnswerMetadata::from_state(state, decision),
        }
    }

    /// Forward fragments as they arrive. A failure after the first fragment
    /// ends the answer early and keeps what was received.
    async fn stream_answer(
        &self,
        system: &str,
        user: &str,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<String> {
        let mut stream =
            external::guarded("synthesis", self.timeout, self.llm.stream(system, user)).await?;

        let mut answer = String::new();
        loop {
            let next = tokio::time::timeout(self.timeout, stream.next()).await;
            let fragment = match next {
                Ok(Some(Ok(fragment))) => fragment,
                Ok(None) => break,
                Ok(Some(Err(err))) if answer.is_empty() => return Err(err),
                Err(_) if answer.is_empty() => return Err(Error::Timeout("synthesis".into())),
                Ok(Some(Err(err))) => {
                    warn!("Answer stream failed, keeping partial answer: {}", err);
                    break;
                }
                Err(_) => {
                    warn!("Answer stream stalled, keeping partial answer");
                    break;
                }
            };
            if fragment.is_empty() {
                continue;
            }
            let _ = tx
                .send(AgentEvent::AnswerDelta {
                    text: fragment.clone(),
                })
                .await;
            answer.push_str(&fragment);
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{SearchMetadata, SearchResult};
    use crate::integrations::OfflineLlm;
    use crate::retrieval::Strategy;
    use async_trait::async_trait;

    struct Down;

    #[async_trait]
    impl CompletionService for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(Error::completion("down", "server error"))
        }
    }

    fn hit(doc_id: &str, position: usize, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: format!("{doc_id}#{position}"),
            doc_id: doc_id.to_string(),
            text: text.to_string(),
            score: 1.0,
            strategy: Strategy::Hybrid,
            matched_entities: Vec::new(),
        }
    }

    fn with_history(results: Vec<Vec<SearchHit>>) -> AgentState {
        let mut state = AgentState::new("How much did ACME earn?", 0.7, 5);
        state.iteration = results.len();
        state.results_history = results
            .into_iter()
            .map(|content| SearchResult {
                content,
                strategy: Strategy::Hybrid,
                relevance_score: 0.4,
                confidence: 0.16,
                metadata: SearchMetadata::default(),
            })
            .collect();
        state
    }

    #[test]
    fn evidence_is_deduplicated_in_first_seen_order() {
        let state = with_history(vec![
            vec![hit("b", 0, "two"), hit("a", 0, "one")],
            vec![hit("a", 0, "one again"), hit("a", 1, "three")],
        ]);
        let evidence = collect_evidence(&state);
        let keys: Vec<&str> = evidence.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(keys, vec!["b#0", "a#0", "a#1"]);
        assert_eq!(evidence[1].text, "one");
        assert_eq!(citations(&evidence), vec!["b", "a"]);
    }

    #[test]
    fn evidence_is_capped() {
        let hits: Vec<SearchHit> = (0..15).map(|i| hit(&format!("d{i}"), 0, "t")).collect();
        let state = with_history(vec![hits]);
        assert_eq!(collect_evidence(&state).len(), MAX_EVIDENCE);
    }

    #[test]
    fn prompt_labels_each_document() {
        let prompt = build_prompt("q?", &[hit("acme", 0, "ACME earned\n$12M")]);
        assert!(prompt.starts_with("Q: q?\n\nCONTEXT:\n"));
        assert!(prompt.contains("[DOC acme] ACME earned $12M\n"));
    }

    #[tokio::test]
    async fn offline_answer_cites_the_document() {
        let state = with_history(vec![vec![hit("acme", 0, "ACME earned $12M in Q2.")]]);
        let answer = Synthesizer::new(Arc::new(OfflineLlm), Duration::from_secs(1))
            .synthesize(&state, Decision::Sufficient)
            .await;

        assert!(answer.answer.contains("[acme]"));
        assert_eq!(answer.citations, vec!["acme"]);
        assert_eq!(answer.query_id, state.query_id);
        assert_eq!(answer.metadata.terminal_decision, Decision::Sufficient);
    }

    #[tokio::test]
    async fn failed_call_keeps_citations() {
        let state = with_history(vec![vec![hit("acme", 0, "ACME earned $12M in Q2.")]]);
        let answer = Synthesizer::new(Arc::new(Down), Duration::from_secs(1))
            .synthesize(&state, Decision::Sufficient)
            .await;

        assert!(answer.answer.starts_with("Unable to generate an answer"));
        assert!(answer.answer.contains("[acme]"));
        assert_eq!(answer.citations, vec!["acme"]);
    }

    #[tokio::test]
    async fn empty_history_skips_the_model() {
        let state = with_history(vec![Vec::new()]);
        let answer = Synthesizer::new(Arc::new(Down), Duration::from_secs(1))
            .synthesize(&state, Decision::Failed)
            .await;
        assert_eq!(answer.answer, NO_EVIDENCE_ANSWER);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn streaming_forwards_fragments() {
        let state = with_history(vec![vec![hit("acme", 0, "ACME earned $12M in Q2.")]]);
        let (tx, mut rx) = mpsc::channel(64);
        let answer = Synthesizer::new(Arc::new(OfflineLlm), Duration::from_secs(1))
            .synthesize_streaming(&state, Decision::Sufficient, &tx)
            .await;
        drop(tx);

        let mut streamed = String::new();
        let mut started = false;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::SynthesisStarted { evidence } => {
                    started = true;
                    assert_eq!(evidence, 1);
                }
                AgentEvent::AnswerDelta { text } => streamed.push_str(&text),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(started);
        assert_eq!(streamed, answer.answer);
    }

    #[tokio::test]
    async fn streaming_failure_sends_fallback_once() {
        let state = with_history(vec![vec![hit("acme", 0, "ACME earned $12M in Q2.")]]);
        let (tx, mut rx) = mpsc::channel(8);
        let answer = Synthesizer::new(Arc::new(Down), Duration::from_secs(1))
            .synthesize_streaming(&state, Decision::Sufficient, &tx)
            .await;
        drop(tx);

        let mut deltas = Vec::new();
        while let Some(event) = rx.recv().await {
            if let AgentEvent::AnswerDelta { text } = event {
                deltas.push(text);
            }
        }
        assert_eq!(deltas, vec![answer.answer.clone()]);
        assert!(answer.answer.contains("[acme]"));
    }
}
