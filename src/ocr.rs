//! OCR backends for image-like files.
//!
//! OCR is an external collaborator: [`TesseractOcr`] shells out to the
//! `tesseract` CLI, [`DisabledOcr`] refuses every image so the normalizer
//! skips them with a log line.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::extract::ExtractError;

#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, image: &Path) -> Result<String, ExtractError>;
}

pub struct DisabledOcr;

#[async_trait]
impl OcrBackend for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn recognize(&self, image: &Path) -> Result<String, ExtractError> {
        Err(ExtractError::Ocr(format!(
            "OCR is disabled, cannot read {}",
            image.display()
        )))
    }
}

/// Runs `<command> <image> stdout -l <lang>` and captures stdout.
pub struct TesseractOcr {
    command: String,
    lang: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            lang: lang.into(),
        }
    }
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &Path) -> Result<String, ExtractError> {
        let output = Command::new(&self.command)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .output()
            .await
            .map_err(|e| ExtractError::Ocr(format!("could not run '{}': {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Ocr(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub fn create_ocr(config: &OcrConfig) -> Result<Arc<dyn OcrBackend>> {
    match config.provider.as_str() {
        "tesseract" => Ok(Arc::new(TesseractOcr::new(&config.command, &config.lang))),
        "disabled" => Ok(Arc::new(DisabledOcr)),
        other => bail!("Unknown OCR provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_backend_always_fails() {
        let err = DisabledOcr.recognize(Path::new("scan.png")).await.unwrap_err();
        assert!(err.to_string().contains("scan.png"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_per_file_error() {
        let ocr = TesseractOcr::new("definitely-not-a-real-ocr-binary", "eng");
        let err = ocr.recognize(Path::new("scan.png")).await.unwrap_err();
        assert!(matches!(err, ExtractError::Ocr(_)));
    }
}
