//! OCR adapter: turn raw image bytes into recognised text.
//!
//! Two layers:
//!
//! * [`OcrEngine`] is the backend seam. A backend only ever sees a decoded,
//!   PNG re-encoded [`OcrImage`]; it never deals with codecs.
//!   Implementations: [`vision::VisionOcr`] (a vision LLM) and
//!   [`tesseract::TesseractOcr`] (the `tesseract` binary).
//! * [`OcrRunner`] is what parsers call. It decodes, skips images too small
//!   to hold text, enforces the per-call deadline, bounds concurrency and
//!   hands results back in input order.
//!
//! "No text found" is `Ok(String::new())`, never an error.

pub mod tesseract;
pub mod vision;

pub use tesseract::TesseractOcr;
pub use vision::VisionOcr;

use crate::config::ConversionConfig;
use crate::error::{ConvertError, ExtractionStage, OcrError};
use crate::mode::Mode;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Images narrower or shorter than this (in pixels) are not sent to OCR.
pub const MIN_OCR_DIMENSION: u32 = 4;

/// Expected orientation of images handed to the OCR backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Let the backend detect rotation. (default)
    #[default]
    Auto,
    /// Images are known to be upright.
    Upright,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Auto => f.write_str("auto"),
            Orientation::Upright => f.write_str("upright"),
        }
    }
}

impl FromStr for Orientation {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Orientation::Auto),
            "upright" => Ok(Orientation::Upright),
            other => Err(ConvertError::Configuration(format!(
                "unknown orientation '{other}' (expected auto or upright)"
            ))),
        }
    }
}

/// Which [`OcrEngine`] implementation to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    /// A vision LLM. Needs credentials. (default)
    #[default]
    Vision,
    /// The local `tesseract` binary.
    Tesseract,
}

impl OcrBackend {
    /// Whether building this backend needs an LLM provider.
    pub fn needs_credentials(self) -> bool {
        matches!(self, OcrBackend::Vision)
    }
}

impl FromStr for OcrBackend {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vision" | "llm" => Ok(OcrBackend::Vision),
            "tesseract" => Ok(OcrBackend::Tesseract),
            other => Err(ConvertError::Configuration(format!(
                "unknown OCR backend '{other}' (expected vision or tesseract)"
            ))),
        }
    }
}

/// A decoded image, re-encoded as PNG for the backend.
#[derive(Debug, Clone)]
pub struct OcrImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl OcrImage {
    /// Decode bytes in any supported codec (png, jpeg, webp, gif, bmp, tiff).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OcrError> {
        let format = image::guess_format(bytes)
            .map_err(|e| OcrError::UnsupportedCodec(e.to_string()))?;
        if !matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::WebP
                | ImageFormat::Gif
                | ImageFormat::Bmp
                | ImageFormat::Tiff
        ) {
            return Err(OcrError::UnsupportedCodec(format!("{format:?}")));
        }
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| OcrError::Unreadable(e.to_string()))?;
        Self::from_dynamic(&img)
    }

    /// Lossless PNG keeps glyph edges crisp for the recogniser.
    pub fn from_dynamic(img: &DynamicImage) -> Result<Self, OcrError> {
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Unreadable(format!("PNG encoding failed: {e}")))?;
        Ok(Self {
            png,
            width: img.width(),
            height: img.height(),
        })
    }

    pub fn is_too_small(&self) -> bool {
        self.width < MIN_OCR_DIMENSION || self.height < MIN_OCR_DIMENSION
    }
}

/// An OCR backend.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Recognise all text in `image`. Empty text means none was found.
    async fn recognize(&self, image: &OcrImage, hint: Orientation) -> Result<String, OcrError>;
}

// ── Markers ──────────────────────────────────────────────────────────────

/// Result of OCR'ing one embedded image, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageText {
    Text(String),
    /// Fetch or decode failed and `skip_unreadable_images` is set.
    Unreadable,
}

/// Render the block that stands in for embedded image number `index` (1-based).
///
/// ```text
/// > [image text 3]
/// > recognised line one
/// ```
pub fn image_text_block(index: usize, text: &ImageText) -> String {
    match text {
        ImageText::Unreadable => format!("> [image text {index}] (unreadable image)"),
        ImageText::Text(t) if t.trim().is_empty() => {
            format!("> [image text {index}] (no text found)")
        }
        ImageText::Text(t) => {
            let mut block = format!("> [image text {index}]");
            for line in t.trim().lines() {
                let line = line.trim_end();
                block.push('\n');
                if line.is_empty() {
                    block.push('>');
                } else {
                    block.push_str("> ");
                    block.push_str(line);
                }
            }
            block
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────────────

/// One embedded image waiting for OCR.
#[derive(Debug)]
pub struct PendingImage {
    /// 1-indexed page the image sits on, if the format has pages.
    pub page: Option<usize>,
    /// Raw bytes, or why they could not be obtained.
    pub source: Result<Vec<u8>, String>,
    /// Stage blamed when `source` is an error.
    pub source_stage: ExtractionStage,
}

/// Runs an [`OcrEngine`] with decoding, deadlines and bounded concurrency.
#[derive(Clone)]
pub struct OcrRunner {
    engine: Arc<dyn OcrEngine>,
    concurrency: usize,
    timeout_secs: u64,
    orientation: Orientation,
    skip_unreadable: bool,
    progress: Option<ProgressCallback>,
    recognized: Arc<AtomicUsize>,
}

impl OcrRunner {
    pub fn new(engine: Arc<dyn OcrEngine>, config: &ConversionConfig) -> Self {
        Self {
            engine,
            concurrency: config.ocr_concurrency.max(1),
            timeout_secs: config.ocr_timeout_secs,
            orientation: config.orientation,
            skip_unreadable: config.skip_unreadable_images,
            progress: config.progress_callback.clone(),
            recognized: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build a runner from the configured engine, if there is one.
    pub fn from_config(config: &ConversionConfig) -> Option<Self> {
        config
            .ocr_engine
            .as_ref()
            .map(|engine| Self::new(Arc::clone(engine), config))
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Images handed to the engine so far, shared across clones.
    pub fn recognized_count(&self) -> usize {
        self.recognized.load(Ordering::Relaxed)
    }

    /// Decode and recognise one image.
    pub async fn recognize_bytes(&self, bytes: Vec<u8>) -> Result<String, OcrError> {
        let image = tokio::task::spawn_blocking(move || OcrImage::from_bytes(&bytes))
            .await
            .map_err(|e| OcrError::Unreadable(format!("decode task failed: {e}")))??;

        if image.is_too_small() {
            debug!(
                "Skipping OCR for {}x{} image (below {}px)",
                image.width, image.height, MIN_OCR_DIMENSION
            );
            return Ok(String::new());
        }

        let secs = self.timeout_secs;
        let text = timeout(
            Duration::from_secs(secs),
            self.engine.recognize(&image, self.orientation),
        )
        .await
        .map_err(|_| OcrError::Timeout { secs })??;
        self.recognized.fetch_add(1, Ordering::Relaxed);
        Ok(text.trim().to_string())
    }

    /// Recognise every pending image, returning results in input order.
    ///
    /// At most `ocr_concurrency` calls run at once. The first hard failure
    /// aborts the remaining calls.
    pub async fn recognize_all(
        &self,
        mode: Mode,
        images: Vec<PendingImage>,
    ) -> Result<Vec<ImageText>, ConvertError> {
        let total = images.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        debug!(
            "OCR: {} images via '{}' (concurrency {})",
            total,
            self.engine.name(),
            self.concurrency
        );

        stream::iter(
            images
                .into_iter()
                .enumerate()
                .map(|(idx, pending)| self.recognize_one(mode, idx + 1, total, pending)),
        )
        .buffered(self.concurrency)
        .try_collect()
        .await
    }

    /// Recognise image number `image_num` of `total` (1-based).
    ///
    /// Parsers that produce images lazily drive this through their own
    /// `buffered` stream, so only [`Self::concurrency`] images are held at once.
    pub async fn recognize_one(
        &self,
        mode: Mode,
        image_num: usize,
        total: usize,
        pending: PendingImage,
    ) -> Result<ImageText, ConvertError> {
        let result = self.recognize_pending(mode, image_num, pending).await;
        if result.is_ok() {
            if let Some(ref cb) = self.progress {
                cb.on_image_recognized(image_num, total);
            }
        }
        result
    }

    /// Maximum number of images in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn recognize_pending(
        &self,
        mode: Mode,
        image_num: usize,
        pending: PendingImage,
    ) -> Result<ImageText, ConvertError> {
        let bytes = match pending.source {
            Ok(bytes) => bytes,
            Err(reason) if self.skip_unreadable => {
                warn!("Image {}: unavailable, rendering as unreadable: {}", image_num, reason);
                return Ok(ImageText::Unreadable);
            }
            Err(reason) => {
                return Err(ConvertError::extraction(
                    mode,
                    pending.source_stage,
                    pending.page,
                    format!("image {image_num}: {reason}"),
                ));
            }
        };

        match self.recognize_bytes(bytes).await {
            Ok(text) => Ok(ImageText::Text(text)),
            Err(e) if e.is_bad_image() && self.skip_unreadable => {
                warn!("Image {}: {}, rendering as unreadable", image_num, e);
                Ok(ImageText::Unreadable)
            }
            Err(e) => Err(ConvertError::extraction(
                mode,
                ExtractionStage::Ocr,
                pending.page,
                format!("image {image_num}: {e}"),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by parser tests.
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every image with `"{prefix} {width}x{height}"`.
    pub struct SizeEchoOcr {
        pub prefix: String,
        pub calls: AtomicUsize,
    }

    impl SizeEchoOcr {
        pub fn new(prefix: &str) -> Arc<Self> {
            Arc::new(Self {
                prefix: prefix.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OcrEngine for SizeEchoOcr {
        fn name(&self) -> &str {
            "size-echo"
        }

        async fn recognize(&self, image: &OcrImage, _hint: Orientation) -> Result<String, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} {}x{}", self.prefix, image.width, image.height))
        }
    }

    /// Encode a solid `w`×`h` PNG.
    pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            w,
            h,
            image::Rgba([255, 255, 255, 255]),
        ));
        OcrImage::from_dynamic(&img).unwrap().png
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    struct SlowOcr;

    #[async_trait]
    impl OcrEngine for SlowOcr {
        fn name(&self) -> &str {
            "slow"
        }

        async fn recognize(&self, _image: &OcrImage, _hint: Orientation) -> Result<String, OcrError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }
    }

    fn runner(engine: Arc<dyn OcrEngine>, skip: bool) -> OcrRunner {
        let config = ConversionConfig::builder()
            .ocr_engine(engine)
            .ocr_timeout_secs(1)
            .skip_unreadable_images(skip)
            .build()
            .unwrap();
        OcrRunner::from_config(&config).unwrap()
    }

    #[test]
    fn block_rendering() {
        assert_eq!(
            image_text_block(2, &ImageText::Text("line one\n\nline two\n".into())),
            "> [image text 2]\n> line one\n>\n> line two"
        );
        assert_eq!(
            image_text_block(1, &ImageText::Text("  ".into())),
            "> [image text 1] (no text found)"
        );
        assert_eq!(
            image_text_block(5, &ImageText::Unreadable),
            "> [image text 5] (unreadable image)"
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = OcrImage::from_bytes(b"definitely not an image").unwrap_err();
        assert!(err.is_bad_image());
    }

    #[test]
    fn decode_reports_dimensions() {
        let img = OcrImage::from_bytes(&png_bytes(20, 10)).unwrap();
        assert_eq!((img.width, img.height), (20, 10));
        assert!(!img.is_too_small());
        assert!(OcrImage::from_bytes(&png_bytes(3, 50)).unwrap().is_too_small());
    }

    #[test]
    fn orientation_parse() {
        assert_eq!("Upright".parse::<Orientation>().unwrap(), Orientation::Upright);
        assert!("sideways".parse::<Orientation>().is_err());
        assert_eq!("Tesseract".parse::<OcrBackend>().unwrap(), OcrBackend::Tesseract);
        assert!("easyocr".parse::<OcrBackend>().is_err());
    }

    #[tokio::test]
    async fn tiny_images_skip_the_backend() {
        let engine = SizeEchoOcr::new("seen");
        let r = runner(engine.clone(), false);
        let text = r.recognize_bytes(png_bytes(2, 2)).await.unwrap();
        assert!(text.is_empty());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let engine = SizeEchoOcr::new("img");
        let r = runner(engine, false);
        let pending = (1..=6)
            .map(|i| PendingImage {
                page: None,
                source: Ok(png_bytes(10 * i, 10)),
                source_stage: ExtractionStage::Fetch,
            })
            .collect();
        let out = r.recognize_all(Mode::Html, pending).await.unwrap();
        let expected: Vec<ImageText> = (1..=6)
            .map(|i| ImageText::Text(format!("img {}x10", 10 * i)))
            .collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn bad_image_fails_unless_skipped() {
        let pending = || {
            vec![PendingImage {
                page: Some(2),
                source: Ok(b"garbage".to_vec()),
                source_stage: ExtractionStage::Render,
            }]
        };

        let err = runner(SizeEchoOcr::new("x"), false)
            .recognize_all(Mode::Pdf, pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Extraction {
                stage: ExtractionStage::Ocr,
                page: Some(2),
                ..
            }
        ));

        let out = runner(SizeEchoOcr::new("x"), true)
            .recognize_all(Mode::Pdf, pending())
            .await
            .unwrap();
        assert_eq!(out, vec![ImageText::Unreadable]);
    }

    #[tokio::test]
    async fn unavailable_source_is_a_fetch_error() {
        let pending = vec![PendingImage {
            page: None,
            source: Err("404 Not Found".into()),
            source_stage: ExtractionStage::Fetch,
        }];
        let err = runner(SizeEchoOcr::new("x"), false)
            .recognize_all(Mode::Html, pending)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "got: {err}");
        assert!(matches!(
            err,
            ConvertError::Extraction {
                stage: ExtractionStage::Fetch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let r = runner(Arc::new(SlowOcr), true);
        let err = r.recognize_bytes(png_bytes(10, 10)).await.unwrap_err();
        assert!(matches!(err, OcrError::Timeout { secs: 1 }));
    }
}
