//! Ingest a file or a folder of text files

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::system::RagSystem;

pub async fn run(system: &RagSystem, path: &Path, doc_id: Option<&str>) -> Result<()> {
    let outcomes = system
        .ingest_path(path, doc_id)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    let chunks: usize = outcomes.iter().map(|o| o.chunks).sum();
    info!(documents = outcomes.len(), chunks, "Ingestion finished");

    for outcome in &outcomes {
        println!(
            "{:<40} {:>4} chunks {:>4} entities",
            outcome.doc_id, outcome.chunks, outcome.entities
        );
    }
    println!("\n✅ {} documents, {} chunks", outcomes.len(), chunks);
    Ok(())
}
