//! Persisted similarity index over [`IndexedDocument`]s.
//!
//! [`VectorIndex`] holds every document with its embedding and answers
//! brute-force cosine queries filtered by [`SourceType`]. On disk an index
//! is a directory containing `index.sqlite`:
//!
//! - `index_meta(key, value)`: `model`, `dims`, `doc_count`, `built_at`
//! - `index_documents(id, source_type, content, metadata_json, hash, vector)`
//!
//! [`VectorIndex::save`] writes into a sibling staging directory and renames
//! it over `index_path` only once everything is written, so a failed save
//! never leaves a partial index behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, vec_to_blob, Embedder};
use crate::models::{IndexedDocument, SourceType};

pub const INDEX_FILE: &str = "index.sqlite";

/// Anything that can answer a tag-filtered similarity query.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Up to `k` documents tagged `tag`, most similar first.
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        tag: SourceType,
    ) -> Result<Vec<IndexedDocument>>;
}

struct IndexEntry {
    document: IndexedDocument,
    vector: Vec<f32>,
}

pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
            entries: Vec::new(),
        }
    }

    /// Pair documents with their vectors, in order.
    pub fn build(
        model: impl Into<String>,
        dims: usize,
        documents: Vec<IndexedDocument>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if documents.len() != vectors.len() {
            bail!(
                "{} documents but {} vectors",
                documents.len(),
                vectors.len()
            );
        }
        let mut index = Self::new(model, dims);
        index.entries = documents
            .into_iter()
            .zip(vectors)
            .map(|(document, vector)| IndexEntry { document, vector })
            .collect();
        Ok(index)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &IndexedDocument> {
        self.entries.iter().map(|e| &e.document)
    }

    pub fn count_by_type(&self, tag: SourceType) -> usize {
        self.documents().filter(|d| d.source_type == tag).count()
    }

    /// Rank documents tagged `tag` against `query_vec`. Ties keep insertion order.
    pub fn search(&self, query_vec: &[f32], k: usize, tag: SourceType) -> Vec<(f32, &IndexedDocument)> {
        let mut scored: Vec<(f32, &IndexedDocument)> = self
            .entries
            .iter()
            .filter(|e| e.document.source_type == tag)
            .map(|e| (cosine_similarity(query_vec, &e.vector), &e.document))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Persist to `index_path`, replacing any previous index atomically.
    pub async fn save(&self, index_path: &Path) -> Result<()> {
        let staging = staging_dir(index_path);
        if let Err(e) = self.write_to(&staging).await {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        remove_index(index_path)?;
        std::fs::rename(&staging, index_path).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                staging.display(),
                index_path.display()
            )
        })?;

        tracing::info!(path = %index_path.display(), documents = self.len(), "index saved");
        Ok(())
    }

    async fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let pool = crate::db::connect(&dir.join(INDEX_FILE)).await?;

        let result = async {
            sqlx::query("CREATE TABLE index_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
                .execute(&pool)
                .await?;
            sqlx::query(
                r#"
                CREATE TABLE index_documents (
                    id TEXT PRIMARY KEY,
                    source_type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    metadata_json TEXT NOT NULL,
                    hash TEXT NOT NULL,
                    vector BLOB NOT NULL
                )
                "#,
            )
            .execute(&pool)
            .await?;

            let mut tx = pool.begin().await?;
            for entry in &self.entries {
                let doc = &entry.document;
                sqlx::query(
                    "INSERT INTO index_documents (id, source_type, content, metadata_json, hash, vector) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&doc.id)
                .bind(doc.source_type.as_str())
                .bind(&doc.content)
                .bind(doc.metadata_value().to_string())
                .bind(&doc.hash)
                .bind(vec_to_blob(&entry.vector))
                .execute(&mut *tx)
                .await?;
            }

            let meta = [
                ("model", self.model.clone()),
                ("dims", self.dims.to_string()),
                ("doc_count", self.entries.len().to_string()),
                ("built_at", chrono::Utc::now().to_rfc3339()),
            ];
            for (key, value) in meta {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        pool.close().await;
        result
    }

    pub async fn load(index_path: &Path) -> Result<Self> {
        let file = index_path.join(INDEX_FILE);
        if !file.exists() {
            bail!("no index at {}", index_path.display());
        }
        let pool = crate::db::connect_read_only(&file).await?;
        let result = Self::read_from(&pool).await;
        pool.close().await;
        result.with_context(|| format!("Failed to load index {}", index_path.display()))
    }

    async fn read_from(pool: &sqlx::SqlitePool) -> Result<Self> {
        let meta: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM index_meta")
            .fetch_all(pool)
            .await?;
        let lookup = |key: &str| meta.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        let model = lookup("model").unwrap_or_default().to_string();
        let dims = lookup("dims").and_then(|d| d.parse().ok()).unwrap_or(0);
        let mut index = Self::new(model, dims);

        let rows = sqlx::query(
            "SELECT id, source_type, content, metadata_json, hash, vector FROM index_documents ORDER BY rowid",
        )
        .fetch_all(pool)
        .await?;

        for row in rows {
            let source_type: SourceType = row.get::<String, _>("source_type").parse()?;
            let metadata_json: String = row.get("metadata_json");
            let mut metadata = match serde_json::from_str(&metadata_json)? {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            metadata.remove("source_type");
            let blob: Vec<u8> = row.get("vector");

            index.entries.push(IndexEntry {
                document: IndexedDocument {
                    id: row.get("id"),
                    source_type,
                    content: row.get("content"),
                    metadata,
                    hash: row.get("hash"),
                },
                vector: blob_to_vec(&blob),
            });
        }

        Ok(index)
    }
}

/// True if a persisted index exists at `index_path`.
pub fn index_exists(index_path: &Path) -> bool {
    index_path.join(INDEX_FILE).is_file()
}

/// Delete a persisted index directory. Missing directories are fine.
pub fn remove_index(index_path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(index_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", index_path.display())),
    }
}

fn staging_dir(index_path: &Path) -> PathBuf {
    let name = index_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let staging = format!(".{}.staging-{}", name, uuid::Uuid::new_v4());
    match index_path.parent() {
        Some(parent) => parent.join(staging),
        None => PathBuf::from(staging),
    }
}

/// A loaded index paired with the embedder that answers its queries.
#[derive(Clone)]
pub struct IndexHandle {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
}

impl IndexHandle {
    pub fn new(embedder: Arc<dyn Embedder>, index: VectorIndex) -> Self {
        Self {
            embedder,
            index: Arc::new(index),
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }
}

#[async_trait]
impl SearchIndex for IndexHandle {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        tag: SourceType,
    ) -> Result<Vec<IndexedDocument>> {
        // Nothing to rank; skip the embedding round trip.
        if self.index.count_by_type(tag) == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        Ok(self
            .index
            .search(&query_vec, k, tag)
            .into_iter()
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}
