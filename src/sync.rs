//! Batch sync of external sources into the corpus.
//!
//! Every enabled source runs as its own task on a `JoinSet`, gated by a
//! semaphore. A source that fails or panics is reported in its own
//! [`SyncReport`]; the others carry on.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::system::Ingestor;
use crate::{Error, Result};

/// Records with fewer characters than this are skipped.
pub const MIN_RECORD_CHARS: usize = 10;

const TEXT_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// One unit of text fetched from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Identifier, unique within the source.
    pub id: String,
    pub text: String,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    fn id(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    /// At most `limit` records.
    async fn fetch(&self, limit: usize) -> Result<Vec<SourceRecord>>;
}

/// Read `.md`/`.txt` files under `root`, sorted by path. Record ids are
/// relative paths without extension, `/`-separated.
pub async fn read_text_files(root: PathBuf, limit: usize) -> Result<Vec<SourceRecord>> {
    tokio::task::spawn_blocking(move || read_text_files_blocking(&root, limit))
        .await
        .map_err(|e| Error::Sync(format!("file walk aborted: {}", e)))?
}

fn read_text_files_blocking(root: &Path, limit: usize) -> Result<Vec<SourceRecord>> {
    if !root.is_dir() {
        return Err(Error::Sync(format!("{} is not a directory", root.display())));
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if records.len() >= limit {
            break;
        }
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if !entry.file_type().is_file() || !is_text {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), "Skipping unreadable file: {}", err);
                continue;
            }
        };
        let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        records.push(SourceRecord { id, text });
    }
    Ok(records)
}

/// Directory of text files.
pub struct FolderSource {
    id: String,
    root: PathBuf,
}

impl FolderSource {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }

    /// Parse a `<id>=<dir>` command-line spec.
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split_once('=') {
            Some((id, dir)) if !id.trim().is_empty() && !dir.trim().is_empty() => {
                Ok(Self::new(id.trim(), dir.trim()))
            }
            _ => Err(Error::InvalidArgument(format!(
                "source must look like <id>=<dir>, got {:?}",
                spec
            ))),
        }
    }
}

#[async_trait]
impl DataSource for FolderSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<SourceRecord>> {
        read_text_files(self.root.clone(), limit).await
    }
}

/// Outcome for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source_id: String,
    pub fetched: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub chunks: usize,
    pub entities: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SyncReport {
    fn failed(source_id: &str, error: String) -> Self {
        Self {
            source_id: source_id.to_string(),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub started_at: DateTime<Utc>,
    pub sources: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_ingested: usize,
    pub chunks: usize,
    /// Sorted by source id.
    pub reports: Vec<SyncReport>,
    pub duration_ms: u64,
}

pub struct SyncManager {
    sources: Vec<Arc<dyn DataSource>>,
    ingestor: Ingestor,
    max_concurrent: usize,
    record_limit: usize,
}

impl SyncManager {
    pub fn new(sources: Vec<Arc<dyn DataSource>>, ingestor: Ingestor, config: &SyncConfig) -> Self {
        Self {
            sources,
            ingestor,
            max_concurrent: config.max_concurrent.max(1),
            record_limit: config.record_limit,
        }
    }

    /// Sync every enabled source, at most `max_concurrent` at a time.
    pub async fn sync_all(&self) -> SyncSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();

        for source in self.sources.iter().filter(|s| s.enabled()) {
            pending.insert(source.id().to_string());
            let source = Arc::clone(source);
            let ingestor = self.ingestor.clone();
            let permits = Arc::clone(&permits);
            let limit = self.record_limit;

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => return SyncReport::failed(source.id(), err.to_string()),
                };
                sync_source(source.as_ref(), &ingestor, limit).await
            });
        }

        let mut reports = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    pending.remove(&report.source_id);
                    reports.push(report);
                }
                Err(err) => error!("Sync task aborted: {}", err),
            }
        }
        // Tasks that panicked never reported.
        for source_id in pending {
            reports.push(SyncReport::failed(&source_id, "sync task panicked".to_string()));
        }
        reports.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let succeeded = reports.iter().filter(|r| r.succeeded()).count();
        let summary = SyncSummary {
            started_at,
            sources: reports.len(),
            succeeded,
            failed: reports.len() - succeeded,
            records_ingested: reports.iter().map(|r| r.ingested).sum(),
            chunks: reports.iter().map(|r| r.chunks).sum(),
            reports,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            sources = summary.sources,
            failed = summary.failed,
            records = summary.records_ingested,
            duration_ms = summary.duration_ms,
            "Sync finished"
        );
        summary
    }
}

async fn sync_source(source: &dyn DataSource, ingestor: &Ingestor, limit: usize) -> SyncReport {
    let started = Instant::now();
    let mut report = SyncReport {
        source_id: source.id().to_string(),
        ..SyncReport::default()
    };

    match source.fetch(limit).await {
        Ok(records) => {
            report.fetched = records.len();
            for record in records {
                if record.text.trim().chars().count() < MIN_RECORD_CHARS {
                    report.skipped += 1;
                    continue;
                }
                let doc_id = format!("{}_{}", source.id(), record.id);
                match ingestor.ingest(&doc_id, &record.text).await {
                    Ok(outcome) => {
                        report.ingested += 1;
                        report.chunks += outcome.chunks;
                        report.entities += outcome.entities;
                    }
                    Err(err) => {
                        warn!(source = source.id(), %doc_id, "Record not ingested: {}", err);
                        report.skipped += 1;
                    }
                }
            }
        }
        Err(err) => {
            warn!(source = source.id(), "Fetch failed: {}", err);
            report.error = Some(err.to_string());
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        source = %report.source_id,
        fetched = report.fetched,
        ingested = report.ingested,
        skipped = report.skipped,
        "Source synced"
    );
    report
}
