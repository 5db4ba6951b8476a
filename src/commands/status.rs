//! Corpus and entity graph counts

use anyhow::{Context, Result};

use crate::system::RagSystem;

pub async fn run(system: &RagSystem, json: bool) -> Result<()> {
    let status = system.status().await;
    if json {
        let json = serde_json::to_string_pretty(&status).context("Failed to encode status")?;
        println!("{}", json);
        return Ok(());
    }

    println!("📚 Documents: {}", status.documents);
    println!("🧩 Chunks:    {}", status.chunks);
    println!("🏷  Entities:  {}", status.entities);
    println!("LLM: {} | embeddings: {} | data: {}", status.llm, status.embedder, status.data_dir);
    Ok(())
}
