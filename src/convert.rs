//! Conversion entry points.
//!
//! ## Order of work
//!
//! ```text
//! mode string ──▶ resolve ──▶ validate config ──▶ load ──▶ parse ──▶ stages
//!                 (no I/O)    (no I/O)                     (+OCR)
//! ```
//!
//! Everything that can be rejected without touching the input is rejected
//! first. After that the conversion is all-or-nothing: any failure aborts the
//! remaining work and no partial page list is returned.
//!
//! OCR and cleanup calls are futures polled by the conversion future itself,
//! so dropping it (or aborting it through [`convert_cancellable`]) stops
//! them at once. Blocking work cannot be interrupted: PDF extraction runs on
//! the blocking pool and finishes the object it is reading, then stops at
//! its next channel send once the receiver is gone. Nothing waits for it.

use crate::config::{ConversionConfig, ConversionConfigBuilder};
use crate::credentials::{self, DEFAULT_KEY_FILE};
use crate::error::ConvertError;
use crate::mode::Mode;
use crate::ocr::{OcrBackend, OcrEngine, OcrRunner, TesseractOcr, VisionOcr};
use crate::output::{join_pages, ConversionOutput, ConversionStats};
use crate::parser::{self, Document, ParseContext};
use crate::pipeline::{self, LlmMarkdownCleaner};
use edgequake_llm::LLMProvider;
use futures::future::{AbortRegistration, Abortable};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Convert one document to pages of Markdown.
///
/// # Arguments
/// * `mode`: one of [`parser::supported_modes`]
/// * `input`: path to the document
/// * `config`: conversion configuration
///
/// # Errors
/// * `UnsupportedMode` before any I/O
/// * `Configuration` when OCR is needed and no engine is configured
/// * `Extraction` from loading or parsing
/// * `Cleanup` when a page exhausts its cleanup retries
///
/// # Example
/// ```rust,no_run
/// use file2md::{convert, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::builder().ocr_enabled(false).build()?;
/// let output = convert("csv", "indicators.csv", &config).await?;
/// assert_eq!(output.pages.len(), 1);
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    mode: &str,
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    let total_start = Instant::now();
    let input = input.as_ref();

    // ── Step 1: Resolve mode ─────────────────────────────────────────────
    let parser = parser::resolve(mode)?;
    let mode = parser.mode();

    // ── Step 2: Validate configuration ───────────────────────────────────
    if requires_ocr(mode, config.ocr_enabled) && config.ocr_engine.is_none() {
        return Err(ConvertError::Configuration(format!(
            "mode '{mode}' needs an OCR engine (set one, or disable image text extraction)"
        )));
    }
    let stages = pipeline::build_stages(config);

    info!("Converting {} as {}", input.display(), mode);
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(mode);
    }

    // ── Step 3: Load ─────────────────────────────────────────────────────
    let doc = Document::load(input, mode).await?;

    // ── Step 4: Parse ────────────────────────────────────────────────────
    let extraction_start = Instant::now();
    let runner = if requires_ocr(mode, config.ocr_enabled) {
        OcrRunner::from_config(config)
    } else {
        None
    };
    let ctx = ParseContext::new(config, runner.as_ref());
    let pages = parser.parse(&doc, &ctx).await?;
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;
    drop(doc);

    info!(
        "Extracted {} pages in {}ms",
        pages.len(),
        extraction_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(pages.len());
    }

    // ── Step 5: Stages ───────────────────────────────────────────────────
    let (pages, report) = pipeline::run_stages(&stages, pages).await?;

    let stats = ConversionStats {
        total_pages: pages.len(),
        images_recognized: runner.as_ref().map_or(0, OcrRunner::recognized_count),
        pages_defanged: report.pages_defanged,
        pages_cleaned: report.cleanup.cleaned_pages,
        cleanup_attempts: report.cleanup.attempts,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        extraction_duration_ms,
        cleanup_duration_ms: report.cleanup_duration_ms,
    };

    info!(
        "Conversion complete: {} pages, {}ms total",
        stats.total_pages, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(stats.total_pages);
    }

    Ok(ConversionOutput { mode, pages, stats })
}

/// Convert and write the joined pages to `output_path`.
///
/// Uses atomic write (temp file + rename); nothing is written when the
/// conversion or the write fails.
pub async fn convert_to_file(
    mode: &str,
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, ConvertError> {
    let output = convert(mode, input, config).await?;
    let markdown = join_pages(&output.pages, &config.page_separator);
    write_atomic(output_path.as_ref(), markdown).await?;
    Ok(output.stats)
}

/// Write through a temp file in the target directory, then rename over `path`.
///
/// The temp file is removed on drop, so a failed write leaves nothing behind.
async fn write_atomic(path: &Path, contents: String) -> Result<(), ConvertError> {
    let target = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = match target.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent.to_path_buf()
            }
            None => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        debug!("Wrote {} bytes to {}", contents.len(), target.display());
        Ok(())
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("output write task panicked: {e}")))?;

    result.map_err(|source| ConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    mode: &str,
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(mode, input, config))
}

/// [`convert`], stoppable through the matching `AbortHandle`.
///
/// Aborting drops every in-flight OCR and cleanup future (tesseract children
/// are killed on drop) and returns [`ConvertError::Cancelled`] without
/// waiting for a PDF extraction thread to notice.
pub async fn convert_cancellable(
    mode: &str,
    input: impl AsRef<Path>,
    config: &ConversionConfig,
    registration: AbortRegistration,
) -> Result<ConversionOutput, ConvertError> {
    match Abortable::new(convert(mode, input, config), registration).await {
        Ok(result) => result,
        Err(_aborted) => {
            info!("Conversion cancelled");
            Err(ConvertError::Cancelled)
        }
    }
}

// ── Key-file driven configuration ────────────────────────────────────────

/// Feature switches for [`convert_file`] and the CLI.
#[derive(Debug, Clone)]
pub struct FileOptions {
    /// Key file; [`DEFAULT_KEY_FILE`] when `None`.
    pub credentials_path: Option<PathBuf>,
    pub ocr_enabled: bool,
    pub defang_enabled: bool,
    pub clean_with_llm: bool,
    pub ocr_backend: OcrBackend,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            credentials_path: None,
            ocr_enabled: true,
            defang_enabled: true,
            clean_with_llm: false,
            ocr_backend: OcrBackend::default(),
        }
    }
}

impl FileOptions {
    /// Whether these options need an LLM provider for `mode`.
    pub fn needs_credentials(&self, mode: Mode) -> bool {
        self.clean_with_llm
            || (requires_ocr(mode, self.ocr_enabled) && self.ocr_backend.needs_credentials())
    }

    fn key_file(&self) -> &Path {
        self.credentials_path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_KEY_FILE))
    }
}

/// Finish `builder` with the OCR engine and cleaner `opts` ask for.
///
/// The key file is read only when a feature that needs it is on.
pub fn file_config(
    mode: Mode,
    opts: &FileOptions,
    builder: ConversionConfigBuilder,
) -> Result<ConversionConfig, ConvertError> {
    let provider: Option<Arc<dyn LLMProvider>> = if opts.needs_credentials(mode) {
        Some(credentials::load_provider(opts.key_file())?)
    } else {
        debug!("No LLM feature enabled, key file not read");
        None
    };
    let require_provider = || {
        provider
            .clone()
            .ok_or_else(|| ConvertError::Internal("LLM provider was not loaded".to_string()))
    };

    let mut builder = builder
        .ocr_enabled(opts.ocr_enabled)
        .defang_enabled(opts.defang_enabled);

    if requires_ocr(mode, opts.ocr_enabled) {
        let engine: Arc<dyn OcrEngine> = match opts.ocr_backend {
            OcrBackend::Vision => Arc::new(VisionOcr::new(require_provider()?)),
            OcrBackend::Tesseract => Arc::new(TesseractOcr::new()),
        };
        builder = builder.ocr_engine(engine);
    }
    if opts.clean_with_llm {
        builder = builder.cleaner(Arc::new(LlmMarkdownCleaner::new(require_provider()?)));
    }
    builder.build()
}

/// Convert with feature switches instead of a hand-built config.
pub async fn convert_file(
    mode: &str,
    input: impl AsRef<Path>,
    credentials_path: Option<&Path>,
    ocr_enabled: bool,
    defang_enabled: bool,
    clean_with_llm: bool,
) -> Result<ConversionOutput, ConvertError> {
    let resolved: Mode = mode.parse()?;
    let opts = FileOptions {
        credentials_path: credentials_path.map(Path::to_path_buf),
        ocr_enabled,
        defang_enabled,
        clean_with_llm,
        ..Default::default()
    };
    let config = file_config(resolved, &opts, ConversionConfig::builder())?;
    convert(mode, input, &config).await
}

/// `{stem}.file2md-{mode}.md` next to the input.
pub fn default_output_path(input: impl AsRef<Path>, mode: Mode) -> PathBuf {
    let input = input.as_ref();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}.file2md-{}.md", mode.as_str()))
}

/// Image mode always OCRs; other modes only for embedded images when enabled.
fn requires_ocr(mode: Mode, ocr_enabled: bool) -> bool {
    mode == Mode::Image || (ocr_enabled && mode.has_embedded_images())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_mode_fails_before_io() {
        let err = convert("docx", "/definitely/not/here.docx", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedMode { .. }));
    }

    #[tokio::test]
    async fn missing_ocr_engine_fails_before_io() {
        let err = convert("html", "/definitely/not/here.html", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));

        let err = convert("image", "/definitely/not/here.png", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[tokio::test]
    async fn missing_input_is_a_read_error() {
        let config = ConversionConfig::builder().ocr_enabled(false).build().unwrap();
        let err = convert("html", "/definitely/not/here.html", &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Extraction {
                stage: crate::error::ExtractionStage::Read,
                ..
            }
        ));
    }

    #[test]
    fn ocr_requirement() {
        assert!(requires_ocr(Mode::Image, false));
        assert!(requires_ocr(Mode::Pdf, true));
        assert!(!requires_ocr(Mode::Pdf, false));
        assert!(!requires_ocr(Mode::Csv, true));
    }

    #[test]
    fn key_file_only_read_when_needed() {
        let opts = FileOptions {
            credentials_path: Some(PathBuf::from("/nonexistent/key.json")),
            ocr_enabled: false,
            ..Default::default()
        };
        assert!(!opts.needs_credentials(Mode::Html));
        let config = file_config(Mode::Html, &opts, ConversionConfig::builder()).unwrap();
        assert!(config.ocr_engine.is_none());
        assert!(config.cleaner.is_none());

        let tesseract = FileOptions {
            ocr_backend: OcrBackend::Tesseract,
            ..opts.clone()
        };
        let config = file_config(Mode::Image, &tesseract, ConversionConfig::builder()).unwrap();
        assert_eq!(config.ocr_engine.as_ref().map(|e| e.name()), Some("tesseract"));

        let cleaning = FileOptions {
            clean_with_llm: true,
            ..opts
        };
        let err = file_config(Mode::Csv, &cleaning, ConversionConfig::builder()).unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[test]
    fn output_path_sits_next_to_input() {
        assert_eq!(
            default_output_path("/reports/apt29.html", Mode::HtmlArticle),
            PathBuf::from("/reports/apt29.file2md-html_article.md")
        );
        assert_eq!(
            default_output_path("scan.png", Mode::Image),
            PathBuf::from("scan.file2md-image.md")
        );
    }

    #[tokio::test]
    async fn abort_maps_to_cancelled() {
        let (handle, registration) = futures::future::AbortHandle::new_pair();
        handle.abort();
        let config = ConversionConfig::builder().ocr_enabled(false).build().unwrap();
        let err = convert_cancellable("csv", "/x.csv", &config, registration)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
    }
}
