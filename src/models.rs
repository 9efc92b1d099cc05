//! Core data models used throughout anyfile-index.
//!
//! These types represent the source files, indexed documents, and their
//! modality tags that flow through the ingestion and retrieval pipeline.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Closed classification of every [`IndexedDocument`].
///
/// A new modality must add a variant here rather than reuse an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A chunk of text extracted from a text-like document.
    TextChunk,
    /// The OCR text of one image.
    ImageText,
    /// A generated card describing one relational table.
    TableSummary,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [
        SourceType::TextChunk,
        SourceType::ImageText,
        SourceType::TableSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::TextChunk => "text_chunk",
            SourceType::ImageText => "image_text",
            SourceType::TableSummary => "table_summary",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text_chunk" => Ok(SourceType::TextChunk),
            "image_text" => Ok(SourceType::ImageText),
            "table_summary" => Ok(SourceType::TableSummary),
            other => anyhow::bail!(
                "unknown source type '{}': expected text_chunk, image_text, or table_summary",
                other
            ),
        }
    }
}

/// Extension-based class of a file found under the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    /// CSV and spreadsheet files, loaded into relational tables.
    Tabular,
    /// Documents whose text can be extracted directly.
    Text,
    /// Raster images, read through OCR.
    Image,
}

impl FileClass {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileClass::Tabular => &["csv", "xlsx", "xls"],
            FileClass::Text => &["pdf", "docx", "pptx", "md", "html", "htm", "txt"],
            FileClass::Image => &["png", "jpg", "jpeg", "tiff", "tif"],
        }
    }

    /// Classify a path by its lowercase extension. Unknown extensions yield `None`.
    pub fn from_path(path: &Path) -> Option<FileClass> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        [FileClass::Tabular, FileClass::Text, FileClass::Image]
            .into_iter()
            .find(|class| class.extensions().contains(&ext.as_str()))
    }
}

/// The unit stored in the similarity index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub source_type: SourceType,
    pub content: String,
    /// Provenance fields (origin file, table name, offsets). Never contains
    /// `source_type`; that is injected by [`IndexedDocument::metadata_value`].
    pub metadata: Map<String, Value>,
    /// SHA-256 of `content`.
    pub hash: String,
}

impl IndexedDocument {
    pub fn new(source_type: SourceType, content: impl Into<String>) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        Self {
            id: Uuid::new_v4().to_string(),
            source_type,
            content,
            metadata: Map::new(),
            hash,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != "source_type" {
            self.metadata.insert(key.to_string(), value.into());
        }
        self
    }

    /// Metadata as a JSON object with the mandatory `source_type` key.
    pub fn metadata_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "source_type".to_string(),
            Value::String(self.source_type.as_str().to_string()),
        );
        for (k, v) in &self.metadata {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "content": self.content,
            "metadata": self.metadata_value(),
        })
    }
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
