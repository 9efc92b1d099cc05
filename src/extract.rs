//! Plain-text extraction for unstructured documents.
//!
//! [`FileExtractor`] is the default [`ContentExtractor`]: it dispatches on the
//! file extension to PDF, OOXML (docx/pptx), HTML, and plain-text readers, and
//! hands images to an [`OcrBackend`]. Failures are per-file; the normalizer
//! logs them and moves on.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::ocr::OcrBackend;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_HTML: &str = "text/html";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
pub(crate) const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Rendering width for HTML-to-text conversion.
const HTML_WIDTH: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("HTML extraction failed: {0}")]
    Html(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
}

/// Text pulled out of one file.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub content_type: String,
}

/// Turns a file on disk into plain text.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError>;
}

/// Extension-dispatching extractor backed by an OCR engine for images.
pub struct FileExtractor {
    ocr: Arc<dyn OcrBackend>,
}

impl FileExtractor {
    pub fn new(ocr: Arc<dyn OcrBackend>) -> Self {
        Self { ocr }
    }
}

#[async_trait]
impl ContentExtractor for FileExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "tiff" | "tif") {
            let text = self.ocr.recognize(path).await?;
            let subtype = match ext.as_str() {
                "jpg" => "jpeg",
                "tif" => "tiff",
                other => other,
            };
            return Ok(Extracted {
                text,
                content_type: format!("image/{}", subtype),
            });
        }

        let content_type = match ext.as_str() {
            "pdf" => MIME_PDF,
            "docx" => MIME_DOCX,
            "pptx" => MIME_PPTX,
            "html" | "htm" => MIME_HTML,
            "md" => MIME_MARKDOWN,
            "txt" => MIME_TEXT,
            other => return Err(ExtractError::Unsupported(other.to_string())),
        };

        let bytes = tokio::fs::read(path).await.map_err(|e| ExtractError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        // pdf-extract and zip parsing are CPU bound.
        let ct = content_type.to_string();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &ct))
            .await
            .map_err(|e| ExtractError::Io {
                path: path.display().to_string(),
                source: std::io::Error::other(e),
            })??;

        Ok(Extracted {
            text,
            content_type: content_type.to_string(),
        })
    }
}

/// Extracts plain text from raw bytes of a known content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_HTML => extract_html(bytes),
        MIME_MARKDOWN | MIME_TEXT => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Err(ExtractError::Unsupported(content_type.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_html(bytes: &[u8]) -> Result<String, ExtractError> {
    html2text::from_read(bytes, HTML_WIDTH).map_err(|e| ExtractError::Html(e.to_string()))
}

pub(crate) fn read_zip_entry_bounded<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    // Paragraphs become blank-line separated so the splitter can use them.
    collect_text_runs(&xml, b"p", "\n\n")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut slides = Vec::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_text_runs(&xml, b"p", "\n")?;
        if !text.trim().is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Concatenate every `<*:t>` text run, emitting `block_sep` at the end of
/// each `block` element (e.g. `w:p`, `a:p`).
fn collect_text_runs(xml: &[u8], block: &[u8], block_sep: &str) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_t = false;
                } else if name.as_ref() == block {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        blocks.push(trimmed.to_string());
                    }
                    current.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        blocks.push(trimmed.to_string());
    }
    Ok(blocks.join(block_sep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second &amp; last."]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "First paragraph.\n\nSecond & last.");
    }

    #[test]
    fn html_is_rendered_to_text() {
        let text = extract_text(b"<html><body><h1>Title</h1><p>Body text</p></body></html>", MIME_HTML)
            .unwrap();
        assert!(text.contains("Title"));
        assert!(text.contains("Body text"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn plain_text_is_lossy_utf8() {
        let text = extract_text(b"caf\xc3\xa9 \xff", MIME_TEXT).unwrap();
        assert!(text.starts_with("café"));
    }
}
