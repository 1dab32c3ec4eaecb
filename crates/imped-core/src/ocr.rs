//! Text recognition collaborator used for captcha images

/// Recognizes text in an image
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Return the text found in `image` (PNG bytes)
    async fn recognize_text(&self, image: &[u8], lang: &str) -> anyhow::Result<String>;
}

/// Recognizer for portals without a captcha; always fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecognizer;

#[async_trait::async_trait]
impl TextRecognizer for NoRecognizer {
    async fn recognize_text(&self, _image: &[u8], _lang: &str) -> anyhow::Result<String> {
        anyhow::bail!("no text recognizer configured")
    }
}
