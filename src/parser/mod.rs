//! Format parsers and the mode dispatcher.
//!
//! Every [`Mode`] maps to exactly one [`Parser`]. The set is closed, so
//! [`parser_for`] is an exhaustive match; [`resolve`] adds the string
//! lookup used by callers that start from a mode name.
//!
//! ```text
//! "html_article" ──resolve──▶ Mode::HtmlArticle ──parser_for──▶ HtmlParser { article: true }
//! ```

pub mod csv;
pub mod html;
pub mod image;
pub mod pdf;
pub mod resource;

use crate::config::ConversionConfig;
use crate::error::{ConvertError, ExtractionStage};
use crate::mode::Mode;
use crate::ocr::OcrRunner;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An input file loaded into memory.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub mode: Mode,
    pub bytes: Vec<u8>,
}

impl Document {
    /// Read `path` fully.
    pub async fn load(path: impl AsRef<Path>, mode: Mode) -> Result<Self, ConvertError> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ConvertError::extraction(
                mode,
                ExtractionStage::Read,
                None,
                format!("{}: {e}", path.display()),
            )
        })?;
        debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
        Ok(Self { path, mode, bytes })
    }

    /// Wrap bytes already in memory; `path` is used only for relative lookups.
    pub fn from_bytes(path: impl Into<PathBuf>, mode: Mode, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mode,
            bytes,
        }
    }

    /// Directory relative resources are resolved against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// What a parser may use besides the document.
pub struct ParseContext<'a> {
    pub config: &'a ConversionConfig,
    /// Present when OCR is possible; parsers must not OCR without it.
    pub ocr: Option<&'a OcrRunner>,
}

impl<'a> ParseContext<'a> {
    pub fn new(config: &'a ConversionConfig, ocr: Option<&'a OcrRunner>) -> Self {
        Self { config, ocr }
    }

    /// The runner to use for embedded images, if `ocr_enabled` is set.
    pub fn embedded_ocr(&self) -> Option<&'a OcrRunner> {
        if self.config.ocr_enabled {
            self.ocr
        } else {
            None
        }
    }
}

/// Turns one document into ordered Markdown pages.
#[async_trait]
pub trait Parser: Send + Sync {
    fn mode(&self) -> Mode;

    /// Extract every page. Returns at least one page on success.
    async fn parse(&self, doc: &Document, ctx: &ParseContext<'_>) -> Result<Vec<String>, ConvertError>;
}

/// The parser registered for `mode`.
pub fn parser_for(mode: Mode) -> Box<dyn Parser> {
    match mode {
        Mode::Csv => Box::new(csv::CsvParser),
        Mode::Html => Box::new(html::HtmlParser::full()),
        Mode::HtmlArticle => Box::new(html::HtmlParser::article()),
        Mode::Image => Box::new(image::ImageParser),
        Mode::Pdf => Box::new(pdf::PdfParser),
    }
}

/// Look up the parser for a mode name, failing with `UnsupportedMode`.
pub fn resolve(mode: &str) -> Result<Box<dyn Parser>, ConvertError> {
    let mode: Mode = mode.parse()?;
    Ok(parser_for(mode))
}

/// Wire names of every registered mode.
pub fn supported_modes() -> Vec<&'static str> {
    Mode::ALL.iter().map(|m| m.as_str()).collect()
}
