//! Error types for the file2md library.
//!
//! [`ConvertError`] is the single fatal error returned by every `convert*`
//! entry point. Each variant corresponds to one failure class a caller may
//! want to react to differently:
//!
//! * `UnsupportedMode`: rejected before any I/O happens.
//! * `Extraction`: a format parser (or the OCR step inside it) failed.
//!   Carries the mode, the stage and, when known, the 1-indexed page.
//! * `Cleanup`: the LLM cleanup service exhausted its retries.
//! * `Configuration`: a feature was enabled without what it needs
//!   (credentials, an OCR engine).
//!
//! There is no partial-success path: a conversion either returns every page
//! or returns one of these.

use crate::mode::Mode;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the file2md library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Dispatch ─────────────────────────────────────────────────────────
    /// The requested mode is not one of the registered parsers.
    #[error("Unsupported mode '{mode}'. Supported modes: {supported}")]
    UnsupportedMode { mode: String, supported: String },

    // ── Extraction ───────────────────────────────────────────────────────
    /// A parser failed while turning the document into pages.
    #[error("{}", describe_extraction(.mode, .stage, .page, .detail))]
    Extraction {
        mode: Mode,
        stage: ExtractionStage,
        /// 1-indexed page, when the failure is tied to one.
        page: Option<usize>,
        detail: String,
    },

    // ── Cleanup ──────────────────────────────────────────────────────────
    /// The cleanup service failed for a page after all retries.
    #[error("Cleanup failed on page {page} after {attempts} attempt(s): {detail}")]
    Cleanup {
        page: usize,
        attempts: u32,
        detail: String,
    },

    // ── Config errors ────────────────────────────────────────────────────
    /// A feature was enabled without the collaborator it depends on.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ── I/O errors ───────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The conversion was aborted by the caller.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Shorthand for an [`ConvertError::Extraction`] error.
    pub fn extraction(
        mode: Mode,
        stage: ExtractionStage,
        page: Option<usize>,
        detail: impl Into<String>,
    ) -> Self {
        ConvertError::Extraction {
            mode,
            stage,
            page,
            detail: detail.into(),
        }
    }

    /// Short machine-readable class name, used in logs and JSON output.
    pub fn class(&self) -> &'static str {
        match self {
            ConvertError::UnsupportedMode { .. } => "unsupported_mode",
            ConvertError::Extraction { .. } => "extraction",
            ConvertError::Cleanup { .. } => "cleanup",
            ConvertError::Configuration(_) => "configuration",
            ConvertError::OutputWriteFailed { .. } => "output",
            ConvertError::Cancelled => "cancelled",
            ConvertError::Internal(_) => "internal",
        }
    }
}

fn describe_extraction(
    mode: &Mode,
    stage: &ExtractionStage,
    page: &Option<usize>,
    detail: &str,
) -> String {
    match page {
        Some(p) => format!("Extraction failed [{mode}/{stage}] on page {p}: {detail}"),
        None => format!("Extraction failed [{mode}/{stage}]: {detail}"),
    }
}

/// Where inside a parser an [`ConvertError::Extraction`] happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    /// Reading the input file.
    Read,
    /// Decoding bytes (text encoding, image codec).
    Decode,
    /// Parsing the format's structure (CSV records, HTML tree).
    Parse,
    /// Opening the document with a native library (pdfium).
    Load,
    /// Pulling text or objects out of a loaded page.
    Render,
    /// Downloading or locating an embedded resource.
    Fetch,
    /// Running OCR on an image.
    Ocr,
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionStage::Read => "read",
            ExtractionStage::Decode => "decode",
            ExtractionStage::Parse => "parse",
            ExtractionStage::Load => "load",
            ExtractionStage::Render => "render",
            ExtractionStage::Fetch => "fetch",
            ExtractionStage::Ocr => "ocr",
        };
        f.write_str(s)
    }
}

/// Failure of a single OCR call.
///
/// Converted into [`ConvertError::Extraction`] by the parser that issued
/// the call, which adds mode and page context.
#[derive(Debug, Clone, Error)]
pub enum OcrError {
    /// The bytes are not an image format we can decode.
    #[error("unsupported image format: {0}")]
    UnsupportedCodec(String),

    /// The format is known but the data is corrupt or truncated.
    #[error("unreadable image: {0}")]
    Unreadable(String),

    /// The OCR backend returned an error.
    #[error("OCR backend '{backend}' failed: {detail}")]
    Backend { backend: String, detail: String },

    /// The OCR call exceeded its deadline.
    #[error("OCR timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl OcrError {
    /// Whether the failure is about the image itself rather than the backend.
    pub fn is_bad_image(&self) -> bool {
        matches!(self, OcrError::UnsupportedCodec(_) | OcrError::Unreadable(_))
    }
}

/// Failure of a single cleanup call.
#[derive(Debug, Clone, Error)]
pub enum CleanerError {
    /// Network/service hiccup; the call may be retried.
    #[error("transient cleanup failure: {0}")]
    Transient(String),

    /// The service rejected the request; retrying will not help.
    #[error("permanent cleanup failure: {0}")]
    Permanent(String),
}

impl CleanerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CleanerError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_display_with_page() {
        let e = ConvertError::extraction(Mode::Pdf, ExtractionStage::Ocr, Some(2), "timed out");
        let msg = e.to_string();
        assert!(msg.contains("pdf/ocr"), "got: {msg}");
        assert!(msg.contains("page 2"), "got: {msg}");
    }

    #[test]
    fn extraction_display_without_page() {
        let e = ConvertError::extraction(Mode::Csv, ExtractionStage::Parse, None, "bad quote");
        assert_eq!(e.to_string(), "Extraction failed [csv/parse]: bad quote");
    }

    #[test]
    fn cleanup_display() {
        let e = ConvertError::Cleanup {
            page: 3,
            attempts: 4,
            detail: "503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 3"));
        assert!(msg.contains("4 attempt"));
        assert_eq!(e.class(), "cleanup");
    }

    #[test]
    fn unsupported_mode_lists_modes() {
        let e = ConvertError::UnsupportedMode {
            mode: "docx".into(),
            supported: "csv, pdf".into(),
        };
        assert!(e.to_string().contains("docx"));
        assert!(e.to_string().contains("csv, pdf"));
    }

    #[test]
    fn ocr_error_classification() {
        assert!(OcrError::UnsupportedCodec("svg".into()).is_bad_image());
        assert!(!OcrError::Timeout { secs: 5 }.is_bad_image());
    }

    #[test]
    fn cleaner_error_retryable() {
        assert!(CleanerError::Transient("x".into()).is_retryable());
        assert!(!CleanerError::Permanent("x".into()).is_retryable());
    }
}
