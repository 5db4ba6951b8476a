//! The bounded route → retrieve → evaluate → rewrite loop.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::evaluator::evaluate;
use super::retriever::RetrievalAgent;
use super::rewriter::QueryRewriter;
use super::router::Router;
use super::synthesizer::Synthesizer;
use super::types::{AgentAnswer, AgentEvent, AgentState, Decision};
use crate::config::Config;
use crate::metrics;

/// Capacity of a streamed run's event channel.
pub const EVENT_BUFFER: usize = 64;

/// Loop limits for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub confidence_threshold: f32,
    pub top_k: usize,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_iterations: config.agent.max_iterations.max(1),
            confidence_threshold: config.agent.confidence_threshold,
            top_k: config.retrieval.top_k.max(1),
        }
    }

    /// Apply per-request overrides.
    pub fn with_options(mut self, options: &AskOptions) -> Self {
        if let Some(k) = options.top_k {
            self.top_k = k.max(1);
        }
        if let Some(max_iterations) = options.max_iterations {
            self.max_iterations = max_iterations.max(1);
        }
        self
    }
}

/// Per-request overrides of [`LoopSettings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    pub max_iterations: Option<usize>,
}

pub struct Orchestrator {
    router: Router,
    retriever: RetrievalAgent,
    rewriter: QueryRewriter,
    synthesizer: Synthesizer,
    settings: LoopSettings,
}

impl Orchestrator {
    pub fn new(
        router: Router,
        retriever: RetrievalAgent,
        rewriter: QueryRewriter,
        synthesizer: Synthesizer,
        settings: LoopSettings,
    ) -> Self {
        Self {
            router,
            retriever,
            rewriter,
            synthesizer,
            settings,
        }
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    /// Answer `query`. Always returns an answer, whatever failed on the way.
    pub async fn run(&self, query: &str) -> AgentAnswer {
        self.run_with(query, AskOptions::default()).await
    }

    pub async fn run_with(&self, query: &str, options: AskOptions) -> AgentAnswer {
        let settings = self.settings.with_options(&options);
        self.drive(query, settings, None).await
    }

    /// Same loop as [`Orchestrator::run`], reported as events. The final
    /// event is `SynthesisCompleted`; the channel closes after it.
    pub fn stream(self: &Arc<Self>, query: &str) -> mpsc::Receiver<AgentEvent> {
        self.stream_with(query, AskOptions::default())
    }

    pub fn stream_with(
        self: &Arc<Self>,
        query: &str,
        options: AskOptions,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);
        let query = query.to_string();
        let settings = self.settings.with_options(&options);

        tokio::spawn(async move {
            orchestrator.drive(&query, settings, Some(&tx)).await;
        });
        rx
    }

    async fn drive(
        &self,
        query: &str,
        settings: LoopSettings,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> AgentAnswer {
        let mode = if events.is_some() { "stream" } else { "batch" };
        let started = Instant::now();
        metrics::record_query_start();

        let mut state = AgentState::new(
            query,
            settings.confidence_threshold,
            settings.max_iterations,
        );
        info!(query_id = %state.query_id, mode, "Query started: {}", query);

        let mut decision = Decision::Failed;
        while state.iteration < state.max_iterations {
            state.iteration += 1;
            let iteration = state.iteration;
            emit(events, AgentEvent::IterationStarted { iteration }).await;

            let strategy = self.router.choose(&state.current_query, &state).await;
            emit(events, AgentEvent::StrategyChosen { iteration, strategy }).await;
            metrics::record_strategy(strategy.as_str());

            let result = self
                .retriever
                .execute(&state.current_query, strategy, settings.top_k)
                .await;
            emit(
                events,
                AgentEvent::SearchCompleted {
                    iteration,
                    strategy,
                    hits: result.content.len(),
                    relevance_score: result.relevance_score,
                    confidence: result.confidence,
                },
            )
            .await;

            state.strategies_tried.insert(strategy);
            state.results_history.push(result);
            let Some(latest) = state.results_history.last() else {
                break;
            };

            decision = evaluate(&state, latest);
            info!(
                query_id = %state.query_id,
                iteration,
                %strategy,
                hits = latest.content.len(),
                relevance = latest.relevance_score,
                confidence = latest.confidence,
                %decision,
                "Iteration evaluated"
            );
            emit(events, AgentEvent::EvaluationDecided { iteration, decision }).await;

            match decision {
                Decision::Sufficient | Decision::Failed => break,
                Decision::RewriteQuery => {
                    let rewritten = self.rewriter.rewrite(&state, latest).await;
                    state.current_query = rewritten;
                    emit(
                        events,
                        AgentEvent::QueryRewritten {
                            iteration,
                            query: state.current_query.clone(),
                        },
                    )
                    .await;
                }
                Decision::ChangeStrategy | Decision::Continue => {}
            }
        }

        let answer = match events {
            Some(tx) => self.synthesizer.synthesize_streaming(&state, decision, tx).await,
            None => self.synthesizer.synthesize(&state, decision).await,
        };
        emit(
            events,
            AgentEvent::SynthesisCompleted {
                answer: answer.clone(),
            },
        )
        .await;

        metrics::record_query_result(mode, started.elapsed(), state.iteration, decision.as_str());
        info!(
            query_id = %state.query_id,
            iterations = state.iteration,
            %decision,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query finished"
        );
        answer
    }
}

async fn emit(events: Option<&mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}
