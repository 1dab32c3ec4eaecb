//! Tesseract OCR adapter

use anyhow::{bail, Context};
use async_trait::async_trait;
use imped_core::TextRecognizer;
use std::io::Write;
use std::path::PathBuf;

/// Recognizes text by running the `tesseract` command line tool
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    binary: PathBuf,
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractRecognizer {
    /// Create recognizer using `binary`
    #[inline]
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize_text(&self, image: &[u8], lang: &str) -> anyhow::Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("captcha-")
            .suffix(".png")
            .tempfile()
            .context("creating captcha image file")?;
        file.write_all(image).context("writing captcha image")?;
        file.flush()?;

        let output = tokio::process::Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .args(["-l", lang])
            .output()
            .await
            .with_context(|| format!("running {}", self.binary.display()))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!("ocr recognized {} chars", text.chars().count());
        Ok(text)
    }
}
