//! Configuration types for document-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. A config is constructed once per
//! conversion call and never mutated while the conversion runs.

use crate::error::ConvertError;
use crate::ocr::{OcrEngine, Orientation};
use crate::pipeline::cleanup::MarkdownCleaner;
use crate::pipeline::defang::DefangPolicy;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Fixed string inserted between pages by [`PageSeparator::PageBreak`].
pub const PAGE_BREAK: &str = "\n\n<!-- file2md:page-break -->\n\n";

/// Configuration for a single conversion.
///
/// # Example
/// ```rust
/// use file2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .ocr_enabled(false)
///     .defang_enabled(true)
///     .build()
///     .unwrap();
/// assert!(config.cleaner.is_none());
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// OCR images embedded in HTML and PDF documents. Default: true.
    ///
    /// Image mode always OCRs; this flag only governs embedded images.
    pub ocr_enabled: bool,

    /// Run the defanging stage over every page. Default: true.
    pub defang_enabled: bool,

    /// Which defang rule families run. Default: everything but bare domains.
    pub defang_policy: DefangPolicy,

    /// Cleanup stage. `Some` enables the LLM cleanup pass.
    pub cleaner: Option<Arc<dyn MarkdownCleaner>>,

    /// OCR backend. Required for image mode and whenever `ocr_enabled` is
    /// set for a mode with embedded images.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Maximum OCR calls in flight at once. Default: 4.
    ///
    /// OCR libraries and vision APIs are memory- and rate-hungry; a document
    /// with 200 embedded images must not spawn 200 concurrent calls.
    pub ocr_concurrency: usize,

    /// Deadline for a single OCR call in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// Expected orientation of images handed to OCR. Default: auto-detect.
    pub orientation: Orientation,

    /// Maximum cleanup calls in flight at once. Default: 1 (sequential).
    pub cleanup_concurrency: usize,

    /// Deadline for a single cleanup attempt in seconds. Default: 120.
    pub cleanup_timeout_secs: u64,

    /// Retries after the first failed cleanup attempt. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Download timeout for remote `<img>` sources in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Render undecodable or unreachable embedded images as an
    /// "unreadable image" marker instead of failing. Default: false.
    pub skip_unreadable_images: bool,

    /// Separator used when joining pages into one file. Default: [`PageSeparator::PageBreak`].
    pub page_separator: PageSeparator,

    /// Optional progress callback for extraction and cleanup events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            defang_enabled: true,
            defang_policy: DefangPolicy::default(),
            cleaner: None,
            ocr_engine: None,
            ocr_concurrency: 4,
            ocr_timeout_secs: 60,
            orientation: Orientation::default(),
            cleanup_concurrency: 1,
            cleanup_timeout_secs: 120,
            max_retries: 3,
            retry_backoff_ms: 500,
            fetch_timeout_secs: 30,
            skip_unreadable_images: false,
            page_separator: PageSeparator::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("ocr_enabled", &self.ocr_enabled)
            .field("defang_enabled", &self.defang_enabled)
            .field("defang_policy", &self.defang_policy)
            .field("cleaner", &self.cleaner.as_ref().map(|c| c.name()))
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|e| e.name()))
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("orientation", &self.orientation)
            .field("cleanup_concurrency", &self.cleanup_concurrency)
            .field("cleanup_timeout_secs", &self.cleanup_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("skip_unreadable_images", &self.skip_unreadable_images)
            .field("page_separator", &self.page_separator)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn ocr_enabled(mut self, v: bool) -> Self {
        self.config.ocr_enabled = v;
        self
    }

    pub fn defang_enabled(mut self, v: bool) -> Self {
        self.config.defang_enabled = v;
        self
    }

    pub fn defang_policy(mut self, policy: DefangPolicy) -> Self {
        self.config.defang_policy = policy;
        self
    }

    pub fn cleaner(mut self, cleaner: Arc<dyn MarkdownCleaner>) -> Self {
        self.config.cleaner = Some(cleaner);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn orientation(mut self, hint: Orientation) -> Self {
        self.config.orientation = hint;
        self
    }

    pub fn cleanup_concurrency(mut self, n: usize) -> Self {
        self.config.cleanup_concurrency = n;
        self
    }

    pub fn cleanup_timeout_secs(mut self, secs: u64) -> Self {
        self.config.cleanup_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn skip_unreadable_images(mut self, v: bool) -> Self {
        self.config.skip_unreadable_images = v;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.ocr_concurrency == 0 {
            return Err(ConvertError::Configuration(
                "OCR concurrency must be ≥ 1".into(),
            ));
        }
        if c.cleanup_concurrency == 0 {
            return Err(ConvertError::Configuration(
                "Cleanup concurrency must be ≥ 1".into(),
            ));
        }
        if c.ocr_timeout_secs == 0 || c.cleanup_timeout_secs == 0 || c.fetch_timeout_secs == 0 {
            return Err(ConvertError::Configuration(
                "Timeouts must be at least 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in the joined output file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// The fixed [`PAGE_BREAK`] comment. (default)
    #[default]
    PageBreak,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::PageBreak => PAGE_BREAK.to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }

    /// Parse the CLI spelling: `break`, `hr`, `comment`, or anything else as custom.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "break" | "page-break" | "default" => PageSeparator::PageBreak,
            "hr" | "---" => PageSeparator::HorizontalRule,
            "comment" => PageSeparator::Comment,
            _ => PageSeparator::Custom(s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let c = ConversionConfig::default();
        assert!(c.ocr_enabled);
        assert!(c.defang_enabled);
        assert!(c.cleaner.is_none());
        assert_eq!(c.cleanup_concurrency, 1);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.page_separator, PageSeparator::PageBreak);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ConversionConfig::builder().ocr_concurrency(0).build().unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
        let err = ConversionConfig::builder()
            .cleanup_concurrency(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(ConversionConfig::builder().ocr_timeout_secs(0).build().is_err());
    }

    #[test]
    fn separator_rendering() {
        assert_eq!(PageSeparator::PageBreak.render(2), PAGE_BREAK);
        assert_eq!(PageSeparator::HorizontalRule.render(2), "\n\n---\n\n");
        assert_eq!(PageSeparator::Comment.render(7), "\n\n<!-- page 7 -->\n\n");
        assert_eq!(
            PageSeparator::Custom("<<>>".into()).render(1),
            "\n\n<<>>\n\n"
        );
    }

    #[test]
    fn separator_parsing() {
        assert_eq!(PageSeparator::parse("hr"), PageSeparator::HorizontalRule);
        assert_eq!(PageSeparator::parse("BREAK"), PageSeparator::PageBreak);
        assert_eq!(PageSeparator::parse("comment"), PageSeparator::Comment);
        assert_eq!(
            PageSeparator::parse("=== next ==="),
            PageSeparator::Custom("=== next ===".into())
        );
    }
}
