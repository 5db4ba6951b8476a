//! List and delete documents

use anyhow::Result;

use super::one_line;
use crate::system::RagSystem;

pub async fn list(system: &RagSystem) -> Result<()> {
    let docs = system.list_docs().await;
    if docs.is_empty() {
        println!("The corpus is empty.");
        return Ok(());
    }

    println!("{:<32} {:>8} {:>6}  PREVIEW", "DOC_ID", "CHARS", "CHUNKS");
    for doc in &docs {
        println!(
            "{:<32} {:>8} {:>6}  {}",
            doc.doc_id,
            doc.length,
            doc.chunks,
            one_line(&doc.preview, 60)
        );
    }
    println!("\n{} documents", docs.len());
    Ok(())
}

pub async fn delete(system: &RagSystem, doc_id: &str) -> Result<()> {
    if system.delete(doc_id).await? {
        println!("🗑  Deleted {}", doc_id);
    } else {
        println!("No document named {}", doc_id);
    }
    Ok(())
}
