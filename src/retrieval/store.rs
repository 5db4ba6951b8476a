//! On-disk corpus snapshot.
//!
//! Provides:
//! - an advisory file lock so two processes never write the same data dir
//! - atomic snapshot writes (temp file + rename)
//! - versioned JSON load

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chunker::Chunk;
use super::corpus::Document;
use crate::{Error, Result};

pub const CORPUS_FILE: &str = "corpus.json";
pub const LOCK_FILE: &str = "corpus.lock";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild both indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
    /// chunk_id -> embedding
    pub vectors: std::collections::BTreeMap<String, Vec<f32>>,
}

/// Exclusive lock on the data directory, released on drop.
pub struct StoreLock {
    lock_file: Option<File>,
}

impl StoreLock {
    /// Block until the lock on `dir` is ours.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| Error::Persistence(format!("Failed to open lock file: {}", e)))?;

        lock_file
            .lock_exclusive()
            .map_err(|e| Error::Persistence(format!("Failed to lock data dir: {}", e)))?;

        Ok(Self {
            lock_file: Some(lock_file),
        })
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(ref file) = self.lock_file {
            let _ = file.unlock();
        }
        self.lock_file = None;
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Snapshot location inside a data directory.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    dir: PathBuf,
}

impl CorpusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CORPUS_FILE)
    }

    /// Read the snapshot; `None` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;
        let _lock = StoreLock::acquire(&self.dir)?;

        let content = fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            Error::Persistence(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Persistence(format!(
                "Unsupported corpus version {} in {}",
                snapshot.version,
                path.display()
            )));
        }

        debug!(
            documents = snapshot.documents.len(),
            chunks = snapshot.chunks.len(),
            "Loaded corpus snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Write the snapshot atomically.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let _lock = StoreLock::acquire(&self.dir)?;

        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec(snapshot)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), "Saved corpus snapshot");
        Ok(())
    }
}
