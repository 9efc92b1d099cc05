//! Document normalizer: turns text-like files and images under a data
//! directory into [`IndexedDocument`]s.
//!
//! Text files are extracted and split into overlapping chunks tagged
//! `text_chunk`. Images are read through OCR into one untruncated
//! `image_text` document each. A file that cannot be read is logged and
//! skipped; it never aborts the run.

use std::path::Path;

use anyhow::Result;

use crate::chunk::RecursiveSplitter;
use crate::extract::ContentExtractor;
use crate::models::{FileClass, IndexedDocument, SourceType};
use crate::scan::{discover, ScanOptions};

pub async fn normalize_text(
    source_dir: &Path,
    extractor: &dyn ContentExtractor,
    splitter: &RecursiveSplitter,
    opts: &ScanOptions,
) -> Result<Vec<IndexedDocument>> {
    let files = discover(source_dir, FileClass::Text, opts)?;
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let mut docs = Vec::new();
    for path in &files {
        let extracted = match extractor.extract(path).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "text extraction failed, skipping");
                continue;
            }
        };

        let source = path.display().to_string();
        let chunks = splitter.split_with_offsets(&extracted.text);
        tracing::debug!(file = %source, chunks = chunks.len(), "split document");

        for chunk in chunks {
            docs.push(
                IndexedDocument::new(SourceType::TextChunk, chunk.text)
                    .with_meta("source", source.as_str())
                    .with_meta("start_index", chunk.start_index)
                    .with_meta("content_type", extracted.content_type.as_str()),
            );
        }
    }

    tracing::info!(files = files.len(), chunks = docs.len(), "normalized text documents");
    Ok(docs)
}

pub async fn normalize_images(
    source_dir: &Path,
    extractor: &dyn ContentExtractor,
    opts: &ScanOptions,
) -> Result<Vec<IndexedDocument>> {
    let files = discover(source_dir, FileClass::Image, opts)?;
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let mut docs = Vec::new();
    for path in &files {
        match extractor.extract(path).await {
            Ok(extracted) if extracted.text.trim().is_empty() => {
                tracing::debug!(file = %path.display(), "no text recognised in image");
            }
            Ok(extracted) => {
                docs.push(
                    IndexedDocument::new(SourceType::ImageText, extracted.text)
                        .with_meta("source", path.display().to_string())
                        .with_meta("content_type", extracted.content_type),
                );
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "OCR failed, skipping");
            }
        }
    }

    tracing::info!(files = files.len(), documents = docs.len(), "normalized images");
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractError, Extracted};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Returns the file name repeated, or fails for names containing "bad".
    struct StubExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentExtractor for StubExtractor {
        async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.contains("bad") {
                return Err(ExtractError::Unsupported(name));
            }
            if name.contains("blank") {
                return Ok(Extracted {
                    text: "   ".to_string(),
                    content_type: "image/png".to_string(),
                });
            }
            Ok(Extracted {
                text: format!("{} ", name).repeat(60),
                content_type: "text/plain".to_string(),
            })
        }
    }

    fn stub() -> StubExtractor {
        StubExtractor {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn no_files_means_no_extractor_calls() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("table.csv"), "a\n1").unwrap();
        let extractor = stub();
        let opts = ScanOptions::default();

        let text = normalize_text(tmp.path(), &extractor, &RecursiveSplitter::default(), &opts)
            .await
            .unwrap();
        let images = normalize_images(tmp.path(), &extractor, &opts).await.unwrap();
        assert!(text.is_empty());
        assert!(images.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn text_chunks_carry_provenance_and_failures_are_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.txt"), "").unwrap();
        fs::write(tmp.path().join("bad.md"), "").unwrap();
        let extractor = stub();

        let docs = normalize_text(
            tmp.path(),
            &extractor,
            &RecursiveSplitter::new(200, 40),
            &ScanOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert!(docs.len() > 1);
        for doc in &docs {
            assert_eq!(doc.source_type, SourceType::TextChunk);
            assert!(doc.content.chars().count() <= 200);
            assert!(doc.metadata["source"].as_str().unwrap().ends_with("notes.txt"));
            assert!(doc.metadata["start_index"].is_u64());
            assert_eq!(doc.metadata["content_type"], "text/plain");
        }
        assert_eq!(docs[0].metadata["start_index"], 0);
    }

    #[tokio::test]
    async fn one_document_per_readable_image() {
        let tmp = TempDir::new().unwrap();
        for name in ["scan.png", "bad.jpg", "blank.tiff"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        let docs = normalize_images(tmp.path(), &stub(), &ScanOptions::default())
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_type, SourceType::ImageText);
        // Image text is never chunked.
        assert_eq!(docs[0].content, "scan.png ".repeat(60));
        assert_eq!(docs[0].metadata_value()["source_type"], "image_text");
    }
}
