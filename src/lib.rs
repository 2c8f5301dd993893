//! # file2md
//!
//! Convert CSV, HTML, image and PDF documents into paginated, defanged
//! Markdown for threat-intelligence pipelines.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input file
//!  │
//!  ├─ 1. Mode     resolve `csv | html | html_article | image | pdf` (no I/O yet)
//!  ├─ 2. Parse    format-specific extraction, one page or many
//!  │              └─ OCR  embedded / standalone images via an OcrEngine
//!  ├─ 3. Normalize whitespace and fence tidy-up
//!  ├─ 4. Defang   hxxp://evil[.]example, 10[.]0[.]0[.]1, user[@]host[.]tld
//!  ├─ 5. Cleanup  optional LLM pass with retry/backoff
//!  └─ 6. Output   ordered pages + stats; join with a PageSeparator
//! ```
//!
//! A conversion either returns every page or a [`ConvertError`]; there is no
//! partial result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use file2md::{convert, ConversionConfig, TesseractOcr};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .ocr_engine(Arc::new(TesseractOcr::new()))
//!         .build()?;
//!     let output = convert("html_article", "report.html", &config).await?;
//!     for (i, page) in output.pages.iter().enumerate() {
//!         println!("--- page {} ---\n{}", i + 1, page);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `file2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! file2md = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! PDF mode needs the pdfium shared library, found through `PDFIUM_LIB_PATH`,
//! the working directory or the system library path. Tesseract OCR needs the
//! `tesseract` binary on `PATH`. Vision OCR and cleanup need an LLM provider,
//! usually described by a key file (see [`credentials`]).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod mode;
pub mod ocr;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, PageSeparator, PAGE_BREAK};
pub use convert::{
    convert, convert_cancellable, convert_file, convert_sync, convert_to_file,
    default_output_path, file_config, FileOptions,
};
pub use credentials::{Credentials, CredentialsError};
pub use error::{CleanerError, ConvertError, ExtractionStage, OcrError};
pub use mode::Mode;
pub use ocr::{OcrBackend, OcrEngine, OcrImage, Orientation, TesseractOcr, VisionOcr};
pub use output::{join_pages, ConversionOutput, ConversionStats};
pub use parser::{resolve, supported_modes, Parser};
pub use pipeline::defang::defang;
pub use pipeline::{DefangPolicy, DefangRule, Defanger, LlmMarkdownCleaner, MarkdownCleaner};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
