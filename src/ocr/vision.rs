//! Vision-LLM OCR backend.
//!
//! The image is sent as a base64 PNG data attachment with `detail: "high"`;
//! without it, GPT-4-class models downscale to a single 512 px tile and
//! small print is lost.

use super::{OcrEngine, OcrImage, Orientation};
use crate::error::OcrError;
use crate::pipeline::normalize::strip_markdown_fences;
use crate::prompts::{ocr_system_prompt, NO_TEXT_SENTINEL};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use tracing::debug;

/// OCR through any vision-capable `edgequake-llm` provider.
pub struct VisionOcr {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl VisionOcr {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        let label = format!("vision:{}", provider.name());
        Self { provider, label }
    }
}

/// Wrap a PNG for the multimodal request body.
pub fn encode_image(image: &OcrImage) -> ImageData {
    let b64 = STANDARD.encode(&image.png);
    debug!("Encoded {}x{} image → {} bytes base64", image.width, image.height, b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}

/// Map the model's answer to recognised text.
fn interpret_reply(content: &str) -> String {
    let text = strip_markdown_fences(content);
    let text = text.trim();
    if text == NO_TEXT_SENTINEL {
        String::new()
    } else {
        text.to_string()
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    fn name(&self) -> &str {
        &self.label
    }

    async fn recognize(&self, image: &OcrImage, hint: Orientation) -> Result<String, OcrError> {
        let messages = vec![
            ChatMessage::system(ocr_system_prompt(hint)),
            ChatMessage::user_with_images("", vec![encode_image(image)]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(4096),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| OcrError::Backend {
                backend: self.label.clone(),
                detail: e.to_string(),
            })?;

        debug!(
            "Vision OCR: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(interpret_reply(&response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::png_bytes;

    #[test]
    fn encodes_png_with_high_detail() {
        let image = OcrImage::from_bytes(&png_bytes(10, 10)).unwrap();
        let data = encode_image(&image);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, image.png);
    }

    #[test]
    fn sentinel_means_no_text() {
        assert_eq!(interpret_reply("[[NO_TEXT]]"), "");
        assert_eq!(interpret_reply("  [[NO_TEXT]]\n"), "");
        assert_eq!(interpret_reply("```\nSTOP\n```"), "STOP");
        assert_eq!(interpret_reply("Line 1\nLine 2"), "Line 1\nLine 2");
    }
}
