//! Tag-filtered retrieval over the similarity index.

use anyhow::Result;

use crate::index::SearchIndex;
use crate::models::{IndexedDocument, SourceType};

/// Default number of documents returned.
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// One `Source: …\nContent: …` block per document, blank-line separated.
    pub summary: String,
    pub documents: Vec<IndexedDocument>,
}

/// Run one similarity search restricted to `tag` and render the results.
pub async fn retrieve(
    index: &dyn SearchIndex,
    query: &str,
    tag: SourceType,
    k: usize,
) -> Result<Retrieval> {
    let documents = index.similarity_search(query, k, tag).await?;
    tracing::debug!(%tag, k, hits = documents.len(), "retrieved");
    Ok(Retrieval {
        summary: render_summary(&documents),
        documents,
    })
}

pub fn render_summary(documents: &[IndexedDocument]) -> String {
    documents
        .iter()
        .map(|doc| format!("Source: {}\nContent: {}", doc.metadata_value(), doc.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
