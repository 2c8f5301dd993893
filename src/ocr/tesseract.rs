//! Tesseract OCR backend (`tesseract` binary on `PATH`).
//!
//! The PNG is piped through stdin and text read from stdout, so no temp
//! files are involved. The child is spawned with `kill_on_drop`: a
//! cancelled or timed-out conversion does not leave it running.

use super::{OcrEngine, OcrImage, Orientation};
use crate::error::OcrError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs `tesseract stdin stdout`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a binary other than the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Tesseract language pack(s), e.g. `eng+deu`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn backend_error(&self, detail: impl Into<String>) -> OcrError {
        OcrError::Backend {
            backend: "tesseract".to_string(),
            detail: detail.into(),
        }
    }
}

/// Page segmentation mode for an orientation hint.
///
/// 1 = automatic segmentation with orientation and script detection,
/// 3 = fully automatic segmentation without it.
pub fn page_segmentation_mode(hint: Orientation) -> &'static str {
    match hint {
        Orientation::Auto => "1",
        Orientation::Upright => "3",
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &OcrImage, hint: Orientation) -> Result<String, OcrError> {
        let mut child = Command::new(&self.binary)
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(page_segmentation_mode(hint))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.backend_error(format!("cannot start '{}': {e}", self.binary)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.backend_error("stdin not captured"))?;

        let feed = async move {
            stdin.write_all(&image.png).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| self.backend_error(e.to_string()))?;
        if !output.status.success() {
            return Err(self.backend_error(format!(
                "exit {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        fed.map_err(|e| self.backend_error(format!("writing image: {e}")))?;

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("tesseract: {} chars from {}x{} image", text.len(), image.width, image.height);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::png_bytes;

    #[test]
    fn psm_follows_orientation() {
        assert_eq!(page_segmentation_mode(Orientation::Auto), "1");
        assert_eq!(page_segmentation_mode(Orientation::Upright), "3");
    }

    #[tokio::test]
    async fn missing_binary_is_a_backend_error() {
        let ocr = TesseractOcr::new().with_binary("/nonexistent/file2md-tesseract");
        let image = OcrImage::from_bytes(&png_bytes(8, 8)).unwrap();
        let err = ocr.recognize(&image, Orientation::Auto).await.unwrap_err();
        assert!(matches!(err, OcrError::Backend { .. }));
        assert!(!err.is_bad_image());
    }
}
