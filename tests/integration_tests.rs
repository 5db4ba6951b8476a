//! Integration tests for agentic_rag library
//!
//! These tests verify the public API and module interactions.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use agentic_rag::{
    agents::{
        evaluate, AgentEvent, AgentState, AskOptions, Decision, QueryRewriter, SearchMetadata,
        SearchResult,
    },
    config::Config,
    error::{Error, Result},
    integrations::CompletionService,
    retrieval::{rrf_fuse, Chunker, SearchHit, Strategy},
    sync::{DataSource, FolderSource, SourceRecord},
    RagSystem,
};

const ACME: &str = "ACME earned $12M in Q2.";

fn offline_system(dir: &TempDir) -> RagSystem {
    RagSystem::open(Config::offline(dir.path())).expect("offline system starts")
}

/// Every call fails, as if the provider were down.
struct BrokenModel {
    calls: AtomicUsize,
}

impl BrokenModel {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompletionService for BrokenModel {
    fn name(&self) -> &str {
        "broken"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::completion("broken", "HTTP 500"))
    }
}

/// Repeats the `Query:` line back, never improving anything.
struct EchoModel;

#[async_trait]
impl CompletionService for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        Ok(user
            .lines()
            .find_map(|l| l.strip_prefix("Query: "))
            .unwrap_or_default()
            .to_uppercase())
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_startup_requires_completion_provider() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::offline(dir.path());
    config.llm.provider = None;

    let err = RagSystem::open(config).err().expect("must refuse to start");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_config_from_yaml() {
    let config = Config::from_yaml_str(
        "llm:\n  provider: offline\nretrieval:\n  top_k: 7\nagent:\n  max_iterations: 3\n",
    )
    .unwrap();
    assert_eq!(config.retrieval.top_k, 7);
    assert_eq!(config.agent.max_iterations, 3);
    assert!(config.validate().is_ok());
}

// ============================================================================
// Corpus
// ============================================================================

#[tokio::test]
async fn test_search_before_ingestion_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let system = offline_system(&dir);
    assert!(system.search("anything at all", 5).await.is_empty());
    assert!(!system.delete("missing").await.unwrap());
}

#[tokio::test]
async fn test_persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let long_doc = "Rust ownership rules prevent data races at compile time. ".repeat(40);

    let (before_hits, before_docs) = {
        let system = offline_system(&dir);
        system.ingest("acme", ACME).await.unwrap();
        system.ingest("rust", &long_doc).await.unwrap();
        (
            system.search("ownership data races", 5).await,
            system.list_docs().await,
        )
    };

    let reopened = offline_system(&dir);
    assert_eq!(reopened.list_docs().await, before_docs);
    assert_eq!(reopened.search("ownership data races", 5).await, before_hits);
    assert_eq!(
        reopened
            .graph()
            .read()
            .await
            .filter_docs(&["ACME".to_string()])
            .len(),
        1
    );
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let system = offline_system(&dir);
    let text = "Quarterly report. ".repeat(100);

    let first = system.ingest("report", &text).await.unwrap();
    let chunks = system.corpus().chunk_count().await;
    let second = system.ingest("report", &text).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(system.corpus().chunk_count().await, chunks);
    assert_eq!(system.list_docs().await.len(), 1);
}

#[tokio::test]
async fn test_searches_during_ingestion_see_whole_documents() {
    let dir = tempfile::tempdir().unwrap();
    let system = Arc::new(offline_system(&dir));
    let text = "Concurrency notes about readers and writers. ".repeat(60);
    let expected_chunks = Chunker::default().chunk("doc", &text).len();

    let writer = {
        let system = system.clone();
        let text = text.clone();
        tokio::spawn(async move { system.ingest("doc", &text).await.map(|o| o.chunks) })
    };
    let mut readers = Vec::new();
    for _ in 0..8 {
        let system = system.clone();
        readers.push(tokio::spawn(async move {
            let hits = system.search("readers writers", 50).await;
            hits.iter().filter(|h| h.doc_id == "doc").count()
        }));
    }

    assert_eq!(writer.await.unwrap().unwrap(), expected_chunks);
    for reader in readers {
        let seen = reader.await.unwrap();
        assert!(seen == 0 || seen == expected_chunks.min(50), "torn read: {seen}");
    }
}

// ============================================================================
// Fusion and evaluation
// ============================================================================

#[test]
fn test_rrf_orders_shared_items_first() {
    let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let fused = rrf_fuse(&ids(&["A", "B", "C"]), &ids(&["B", "A", "D"]));
    let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C", "D"]);
    assert!((fused[0].1 - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-12);
}

#[test]
fn test_strong_results_are_always_sufficient() {
    let content: Vec<SearchHit> = (0..5)
        .map(|i| SearchHit {
            chunk_id: format!("d#{i}"),
            doc_id: "d".to_string(),
            text: String::new(),
            score: 1.0,
            strategy: Strategy::Vector,
            matched_entities: Vec::new(),
        })
        .collect();
    let result = SearchResult {
        content,
        strategy: Strategy::Vector,
        relevance_score: 0.9,
        confidence: 0.9,
        metadata: SearchMetadata::default(),
    };

    for iteration in 1..=5 {
        let mut state = AgentState::new("q", 0.7, 5);
        state.iteration = iteration;
        state.strategies_tried.insert(Strategy::Vector);
        assert_eq!(evaluate(&state, &result), Decision::Sufficient);
    }
}

#[tokio::test]
async fn test_rewrite_never_stagnates_with_echoing_model() {
    let rewriter = QueryRewriter::new(Arc::new(EchoModel), Duration::from_secs(1));
    let mut state = AgentState::new("acme revenue", 0.7, 5);
    let last = SearchResult {
        content: Vec::new(),
        strategy: Strategy::Hybrid,
        relevance_score: 0.0,
        confidence: 0.0,
        metadata: SearchMetadata::default(),
    };

    for _ in 0..5 {
        let before = state.current_query.clone();
        state.current_query = rewriter.rewrite(&state, &last).await;
        assert_ne!(state.current_query.to_lowercase(), before.to_lowercase());
    }
}

// ============================================================================
// Agent loop
// ============================================================================

#[tokio::test]
async fn test_end_to_end_acme() {
    let dir = tempfile::tempdir().unwrap();
    let system = offline_system(&dir);
    system.ingest("acme", ACME).await.unwrap();

    let answer = system
        .ask(
            "How much did ACME earn?",
            AskOptions {
                top_k: Some(5),
                max_iterations: None,
            },
        )
        .await;

    let meta = &answer.metadata;
    assert!(meta.total_iterations <= 5);
    assert_eq!(meta.terminal_decision, Decision::Sufficient);
    assert!(meta.strategies[&Strategy::Hybrid].hits >= 1);
    assert!(meta.strategies[&Strategy::Hybrid].mean_relevance > 0.0);
    assert_eq!(answer.citations, vec!["acme"]);
}

#[tokio::test]
async fn test_iterations_respect_budget() {
    let dir = tempfile::tempdir().unwrap();
    let system = offline_system(&dir);
    system.ingest("acme", ACME).await.unwrap();

    for budget in 1..=3 {
        let answer = system
            .ask(
                "Tell me about the weather on Mars",
                AskOptions {
                    top_k: None,
                    max_iterations: Some(budget),
                },
            )
            .await;
        assert!(answer.metadata.total_iterations <= budget);
        assert!(answer.metadata.terminal_decision.is_terminal());
    }
}

#[tokio::test]
async fn test_broken_model_still_yields_cited_answer() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(BrokenModel::new());
    let system = RagSystem::with_llm(Config::offline(dir.path()), model.clone()).unwrap();
    system.ingest("acme", ACME).await.unwrap();
    for i in 0..4 {
        system
            .ingest(&format!("filler{i}"), &format!("ACME branch office number {i} opened."))
            .await
            .unwrap();
    }

    let answer = system
        .ask("How much did ACME earn?", AskOptions::default())
        .await;

    assert!(model.calls.load(Ordering::SeqCst) > 0);
    assert!(answer.answer.starts_with("Unable to generate an answer"));
    assert!(answer.citations.contains(&"acme".to_string()));
    assert!(answer.metadata.terminal_decision.is_terminal());
}

#[tokio::test]
async fn test_stream_matches_batch() {
    let dir = tempfile::tempdir().unwrap();
    let system = offline_system(&dir);
    system.ingest("acme", ACME).await.unwrap();

    let batch = system
        .ask("How much did ACME earn?", AskOptions::default())
        .await;

    let mut rx = system.ask_stream("How much did ACME earn?", AskOptions::default());
    let mut decisions = Vec::new();
    let mut final_answer = None;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::EvaluationDecided { decision, .. } => decisions.push(decision),
            AgentEvent::SynthesisCompleted { answer } => final_answer = Some(answer),
            _ => {}
        }
    }

    let streamed = final_answer.expect("stream ends with the answer");
    assert_eq!(decisions.len(), batch.metadata.total_iterations);
    assert_eq!(streamed.answer, batch.answer);
    assert_eq!(streamed.citations, batch.citations);
    assert_ne!(streamed.query_id, batch.query_id);
}

// ============================================================================
// Sync
// ============================================================================

struct PanickingSource;

#[async_trait]
impl DataSource for PanickingSource {
    fn id(&self) -> &str {
        "explodes"
    }

    async fn fetch(&self, _limit: usize) -> Result<Vec<SourceRecord>> {
        panic!("source blew up");
    }
}

struct DisabledSource;

#[async_trait]
impl DataSource for DisabledSource {
    fn id(&self) -> &str {
        "disabled"
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn fetch(&self, _limit: usize) -> Result<Vec<SourceRecord>> {
        Ok(vec![SourceRecord {
            id: "x".to_string(),
            text: "never fetched at all".to_string(),
        }])
    }
}

#[tokio::test]
async fn test_sync_isolates_failing_sources() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("handbook.md"), "The Initech handbook covers expenses.").unwrap();
    fs::write(docs.join("tiny.txt"), "short").unwrap();

    let system = RagSystem::open(Config::offline(dir.path().join("data"))).unwrap();
    let sources: Vec<Arc<dyn DataSource>> = vec![
        Arc::new(FolderSource::new("wiki", &docs)),
        Arc::new(FolderSource::new("missing", dir.path().join("nope"))),
        Arc::new(PanickingSource),
        Arc::new(DisabledSource),
    ];

    let summary = system.sync_manager(sources).sync_all().await;

    assert_eq!(summary.sources, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.records_ingested, 1);

    let wiki = summary
        .reports
        .iter()
        .find(|r| r.source_id == "wiki")
        .unwrap();
    assert!(wiki.succeeded());
    assert_eq!(wiki.fetched, 2);
    assert_eq!(wiki.skipped, 1);

    assert!(system.corpus().document("wiki_handbook").await.is_some());
    assert!(summary
        .reports
        .iter()
        .any(|r| r.source_id == "explodes" && r.error.is_some()));
}
