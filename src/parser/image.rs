//! A single raster image → one page of recognised text.

use super::{Document, ParseContext, Parser};
use crate::error::{ConvertError, ExtractionStage};
use crate::mode::Mode;
use async_trait::async_trait;
use tracing::info;

pub struct ImageParser;

#[async_trait]
impl Parser for ImageParser {
    fn mode(&self) -> Mode {
        Mode::Image
    }

    /// Image mode ignores `ocr_enabled`: recognising the image is the
    /// whole conversion.
    async fn parse(&self, doc: &Document, ctx: &ParseContext<'_>) -> Result<Vec<String>, ConvertError> {
        let runner = ctx.ocr.ok_or_else(|| {
            ConvertError::Configuration("image mode requires an OCR engine".to_string())
        })?;

        let text = runner.recognize_bytes(doc.bytes.clone()).await.map_err(|e| {
            let stage = if e.is_bad_image() {
                ExtractionStage::Decode
            } else {
                ExtractionStage::Ocr
            };
            ConvertError::extraction(Mode::Image, stage, Some(1), e.to_string())
        })?;

        info!(
            "image: {} chars recognised by '{}'",
            text.len(),
            runner.engine_name()
        );
        if let Some(ref cb) = ctx.config.progress_callback {
            cb.on_image_recognized(1, 1);
        }
        Ok(vec![text])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::ocr::testing::{png_bytes, SizeEchoOcr};
    use crate::ocr::OcrRunner;

    #[tokio::test]
    async fn image_becomes_one_page() {
        let config = ConversionConfig::builder()
            .ocr_enabled(false)
            .ocr_engine(SizeEchoOcr::new("scan"))
            .build()
            .unwrap();
        let runner = OcrRunner::from_config(&config).unwrap();
        let ctx = ParseContext::new(&config, Some(&runner));
        let doc = Document::from_bytes("x.png", Mode::Image, png_bytes(40, 30));

        let pages = ImageParser.parse(&doc, &ctx).await.unwrap();
        assert_eq!(pages, vec!["scan 40x30"]);
    }

    #[tokio::test]
    async fn undecodable_image_is_a_decode_error() {
        let config = ConversionConfig::builder()
            .ocr_engine(SizeEchoOcr::new("scan"))
            .build()
            .unwrap();
        let runner = OcrRunner::from_config(&config).unwrap();
        let ctx = ParseContext::new(&config, Some(&runner));
        let doc = Document::from_bytes("x.png", Mode::Image, b"%PDF-1.7".to_vec());

        let err = ImageParser.parse(&doc, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Extraction {
                stage: ExtractionStage::Decode,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_engine_is_a_configuration_error() {
        let config = ConversionConfig::default();
        let ctx = ParseContext::new(&config, None);
        let doc = Document::from_bytes("x.png", Mode::Image, png_bytes(8, 8));
        let err = ImageParser.parse(&doc, &ctx).await.unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }
}
