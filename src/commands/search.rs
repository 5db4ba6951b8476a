//! Hybrid search without the agent loop

use anyhow::Result;

use super::one_line;
use crate::system::RagSystem;

pub async fn run(system: &RagSystem, query: &str, k: usize) -> Result<()> {
    let hits = system.search(query, k).await;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. [{}] {:.4}  {}",
            rank + 1,
            hit.chunk_id,
            hit.score,
            one_line(&hit.text, 120)
        );
    }
    Ok(())
}
