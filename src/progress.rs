//! Progress-callback trait for conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to be told
//! when extraction finishes, when each embedded image has been OCR'd and
//! when each page comes back from the cleanup service.
//!
//! # Example
//!
//! ```rust
//! use file2md::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     cleaned: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_cleaned(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
//!         self.cleaned.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("cleaned {page_num}/{total_pages} ({markdown_len} bytes)");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { cleaned: AtomicUsize::new(0) });
//! let config = ConversionConfig::builder()
//!     .progress_callback(cb as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::mode::Mode;
use std::sync::Arc;

/// Called by the conversion pipeline as it makes progress.
///
/// Implementations must be `Send + Sync`: OCR calls run concurrently and may
/// report from different tasks. Every method has a no-op default.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, after the mode is validated and before the input is read.
    fn on_conversion_start(&self, mode: Mode) {
        let _ = mode;
    }

    /// Called when an embedded or standalone image has been OCR'd.
    ///
    /// # Arguments
    /// * `image_num`: 1-indexed position of the image in the document
    /// * `total_images`: images queued for OCR in this document
    fn on_image_recognized(&self, image_num: usize, total_images: usize) {
        let _ = (image_num, total_images);
    }

    /// Called when the parser has produced every page.
    fn on_extraction_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a failed cleanup attempt is retried.
    fn on_cleanup_retry(&self, page_num: usize, attempt: u32, error: &str) {
        let _ = (page_num, attempt, error);
    }

    /// Called when a page has been cleaned.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: total pages
    /// * `markdown_len`: byte length of the cleaned Markdown
    fn on_page_cleaned(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// Called once after every stage has succeeded.
    fn on_conversion_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
