//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyfile_index::embedding::Embedder;
use anyfile_index::extract::{extract_text, ContentExtractor, ExtractError, Extracted, MIME_TEXT};
use async_trait::async_trait;

pub const HASH_DIMS: usize = 64;

/// Deterministic bag-of-words embedder: each lowercase word bumps one
/// bucket, then the vector is normalized. Texts sharing words score higher.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn bucket(word: &str) -> usize {
    let mut h: u64 = 1469598103934665603;
    for b in word.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    (h % HASH_DIMS as u64) as usize
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; HASH_DIMS];
                for word in t
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[bucket(&word.to_lowercase())] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    v.iter_mut().for_each(|x| *x /= norm);
                } else {
                    v[0] = 1.0;
                }
                v
            })
            .collect())
    }
}

/// Reads text files directly and "recognizes" images as the text stored in
/// them, so image fixtures are plain files with a `.png` name.
#[derive(Default)]
pub struct CountingExtractor {
    calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentExtractor for CountingExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = fs::read(path).map_err(|e| ExtractError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if ext == "png" {
            return Ok(Extracted {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                content_type: "image/png".to_string(),
            });
        }
        Ok(Extracted {
            text: extract_text(&bytes, MIME_TEXT)?,
            content_type: MIME_TEXT.to_string(),
        })
    }
}

pub const PRICES_CSV: &str = "item,price,in_stock\nwidget,2.50,true\ngadget,10.00,false\ngizmo,7.25,true\n";

/// A corpus with one document, one image, and one table.
pub fn write_mixed_corpus(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("notes.md"),
        "Quarterly planning notes.\n\nThe warehouse in Lisbon ships orders on Tuesdays.",
    )
    .unwrap();
    fs::write(dir.join("receipt.png"), "INVOICE TOTAL 42 EUR").unwrap();
    fs::write(dir.join("prices.csv"), PRICES_CSV).unwrap();
}

/// Write a minimal xlsx workbook. Numeric-looking values become number
/// cells, everything else inline strings. Row 1 is the header.
pub fn write_xlsx(path: &Path, sheets: &[(&str, Vec<Vec<&str>>)]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::SimpleFileOptions::default();

    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut rels = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (i, (name, _)) in sheets.iter().enumerate() {
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            name,
            i + 1,
            i + 1
        ));
        rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            i + 1,
            i + 1
        ));
    }
    workbook.push_str("</sheets></workbook>");
    rels.push_str("</Relationships>");

    zip.start_file("xl/workbook.xml", opts).unwrap();
    zip.write_all(workbook.as_bytes()).unwrap();
    zip.start_file("xl/_rels/workbook.xml.rels", opts).unwrap();
    zip.write_all(rels.as_bytes()).unwrap();

    for (i, (_, rows)) in sheets.iter().enumerate() {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );
        for (r, row) in rows.iter().enumerate() {
            xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, value) in row.iter().enumerate() {
                let cell_ref = format!("{}{}", (b'A' + c as u8) as char, r + 1);
                if value.parse::<f64>().is_ok() {
                    xml.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, cell_ref, value));
                } else {
                    xml.push_str(&format!(
                        r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                        cell_ref, value
                    ));
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), opts)
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
    }

    zip.finish().unwrap();
}
