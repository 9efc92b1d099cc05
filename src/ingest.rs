//! Index builder: the build-or-load entry point of the pipeline.
//!
//! Coordinates normalization → materialization → embedding → persistence.
//! A persisted index is reused as-is unless a rebuild is forced; a rebuild
//! always starts from scratch (there are no incremental updates).

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::chunk::RecursiveSplitter;
use crate::embedding::{embed_in_batches, Embedder};
use crate::extract::ContentExtractor;
use crate::index::{index_exists, remove_index, IndexHandle, VectorIndex};
use crate::materialize::materialize_with;
use crate::models::SourceType;
use crate::normalize::{normalize_images, normalize_text};
use crate::scan::ScanOptions;

/// Counts from one build-or-load run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// True when a persisted index was loaded instead of rebuilt.
    pub cache_hit: bool,
    pub text_chunks: usize,
    pub image_docs: usize,
    pub table_cards: usize,
}

impl BuildReport {
    pub fn total(&self) -> usize {
        self.text_chunks + self.image_docs + self.table_cards
    }
}

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn ContentExtractor>,
    splitter: RecursiveSplitter,
    batch_size: usize,
    scan: ScanOptions,
}

impl IndexBuilder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn ContentExtractor>,
        splitter: RecursiveSplitter,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            extractor,
            splitter,
            batch_size: batch_size.max(1),
            scan: ScanOptions::default(),
        }
    }

    pub fn with_scan_options(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    /// Load the index at `index_path`, or build it from `data_dir`.
    ///
    /// On a cache hit neither `data_dir` nor `db_path` is touched, and a
    /// persisted index built with another embedding model is an error. On a
    /// rebuild any embedding failure aborts with no index written.
    pub async fn build_or_load(
        &self,
        data_dir: &Path,
        db_path: &Path,
        index_path: &Path,
        force_rebuild: bool,
    ) -> Result<(Arc<dyn Embedder>, IndexHandle)> {
        let (handle, _) = self
            .build_or_load_with_report(data_dir, db_path, index_path, force_rebuild)
            .await?;
        Ok((Arc::clone(&self.embedder), handle))
    }

    pub async fn build_or_load_with_report(
        &self,
        data_dir: &Path,
        db_path: &Path,
        index_path: &Path,
        force_rebuild: bool,
    ) -> Result<(IndexHandle, BuildReport)> {
        if !force_rebuild && index_exists(index_path) {
            let index = VectorIndex::load(index_path).await?;
            if index.model() != self.embedder.model_name() || index.dims() != self.embedder.dims() {
                bail!(
                    "persisted index at {} was built with {} ({} dims) but the configured embedder is {} ({} dims); force a rebuild",
                    index_path.display(),
                    index.model(),
                    index.dims(),
                    self.embedder.model_name(),
                    self.embedder.dims()
                );
            }
            let report = BuildReport {
                cache_hit: true,
                text_chunks: index.count_by_type(SourceType::TextChunk),
                image_docs: index.count_by_type(SourceType::ImageText),
                table_cards: index.count_by_type(SourceType::TableSummary),
            };
            tracing::info!(path = %index_path.display(), documents = index.len(), "loaded persisted index");
            return Ok((IndexHandle::new(Arc::clone(&self.embedder), index), report));
        }

        remove_index(index_path)?;

        let extractor = self.extractor.as_ref();
        let text_docs = normalize_text(data_dir, extractor, &self.splitter, &self.scan).await?;
        let image_docs = normalize_images(data_dir, extractor, &self.scan).await?;
        let materialized = materialize_with(data_dir, db_path, &self.scan).await?;
        // Tools reopen the database read-only.
        materialized.close().await;

        let report = BuildReport {
            cache_hit: false,
            text_chunks: text_docs.len(),
            image_docs: image_docs.len(),
            table_cards: materialized.cards.len(),
        };

        let mut documents = text_docs;
        documents.extend(image_docs);
        documents.extend(materialized.cards);

        let vectors = if documents.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
            embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size)
                .await
                .context("Embedding failed; no index was written")?
        };

        let index = VectorIndex::build(
            self.embedder.model_name(),
            self.embedder.dims(),
            documents,
            vectors,
        )?;
        index.save(index_path).await?;

        tracing::info!(
            text_chunks = report.text_chunks,
            image_docs = report.image_docs,
            table_cards = report.table_cards,
            "index built"
        );

        Ok((IndexHandle::new(Arc::clone(&self.embedder), index), report))
    }
}
