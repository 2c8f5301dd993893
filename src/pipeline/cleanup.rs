//! Cleanup stage: route every page through a [`MarkdownCleaner`].
//!
//! The cleaner itself is a narrow, side-effecting collaborator (usually an
//! LLM behind [`crate::pipeline::llm::LlmMarkdownCleaner`]). This module
//! owns everything around the call: ordering, throttling, deadlines and
//! retries.
//!
//! ## Retry Strategy
//!
//! Transient failures (network errors, 429/5xx, timeouts) are retried with
//! exponential backoff, `retry_backoff_ms * 2^(attempt-1)`: with a 500 ms
//! base and 3 retries the wait sequence is 500 ms → 1 s → 2 s. Permanent
//! failures are not retried. When a page runs out of attempts the whole
//! conversion fails; a half-cleaned document is never returned.

use crate::config::ConversionConfig;
use crate::error::{CleanerError, ConvertError};
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Rewrites one page of Markdown.
///
/// Implementations must not merge, split or reorder pages: one page in,
/// one page out.
#[async_trait]
pub trait MarkdownCleaner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "cleaner"
    }

    async fn clean(&self, page: &str) -> Result<String, CleanerError>;
}

/// Outcome of cleaning a whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Pages sent to the cleaner (blank pages are skipped).
    pub cleaned_pages: usize,
    /// Total cleaner calls, retries included.
    pub attempts: u32,
}

/// Drives a [`MarkdownCleaner`] over a page sequence.
#[derive(Clone)]
pub struct CleanupStage {
    cleaner: Arc<dyn MarkdownCleaner>,
    concurrency: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
    progress: Option<ProgressCallback>,
}

impl CleanupStage {
    pub fn new(cleaner: Arc<dyn MarkdownCleaner>, config: &ConversionConfig) -> Self {
        Self {
            cleaner,
            concurrency: config.cleanup_concurrency.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.cleanup_timeout_secs,
            progress: config.progress_callback.clone(),
        }
    }

    pub fn cleaner_name(&self) -> &str {
        self.cleaner.name()
    }

    /// Clean every page, preserving order.
    ///
    /// Up to `cleanup_concurrency` pages are in flight at once; results are
    /// reassembled by index, not completion order. The first page that
    /// fails aborts the rest.
    pub async fn run(&self, pages: Vec<String>) -> Result<(Vec<String>, CleanupReport), ConvertError> {
        let total = pages.len();
        info!(
            "Cleaning {} pages with '{}' (concurrency {})",
            total,
            self.cleaner.name(),
            self.concurrency
        );

        let results: Vec<(String, u32)> = stream::iter(
            pages
                .into_iter()
                .enumerate()
                .map(|(idx, page)| self.clean_page(idx + 1, total, page)),
        )
        .buffered(self.concurrency)
        .try_collect()
        .await?;

        let mut report = CleanupReport::default();
        let cleaned = results
            .into_iter()
            .map(|(page, attempts)| {
                if attempts > 0 {
                    report.cleaned_pages += 1;
                }
                report.attempts += attempts;
                page
            })
            .collect();

        Ok((cleaned, report))
    }

    /// Clean one page with retry, returning the text and the number of calls made.
    async fn clean_page(
        &self,
        page_num: usize,
        total: usize,
        page: String,
    ) -> Result<(String, u32), ConvertError> {
        if page.trim().is_empty() {
            debug!("Page {}: blank, skipping cleanup", page_num);
            return Ok((page, 0));
        }

        let deadline = Duration::from_secs(self.timeout_secs);
        let mut last_err = String::from("Unknown error");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                warn!(
                    "Page {}: cleanup retry {}/{} after {}ms",
                    page_num, attempt, self.max_retries, backoff
                );
                if let Some(ref cb) = self.progress {
                    cb.on_cleanup_retry(page_num, attempt, &last_err);
                }
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(deadline, self.cleaner.clean(&page)).await {
                Ok(Ok(cleaned)) => {
                    debug!(
                        "Page {}: cleaned {} → {} bytes on attempt {}",
                        page_num,
                        page.len(),
                        cleaned.len(),
                        attempt + 1
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_page_cleaned(page_num, total, cleaned.len());
                    }
                    return Ok((cleaned, attempt + 1));
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    return Err(ConvertError::Cleanup {
                        page: page_num,
                        attempts: attempt + 1,
                        detail: e.to_string(),
                    });
                }
                Ok(Err(e)) => {
                    warn!("Page {}: cleanup attempt {} failed: {}", page_num, attempt + 1, e);
                    last_err = e.to_string();
                }
                Err(_) => {
                    warn!(
                        "Page {}: cleanup attempt {} timed out after {}s",
                        page_num,
                        attempt + 1,
                        self.timeout_secs
                    );
                    last_err = format!("timed out after {}s", self.timeout_secs);
                }
            }
        }

        Err(ConvertError::Cleanup {
            page: page_num,
            attempts: self.max_retries + 1,
            detail: last_err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Returns scripted results in order, then echoes the page upper-cased.
    struct ScriptedCleaner {
        script: Mutex<VecDeque<Result<(), CleanerError>>>,
        calls: AtomicU32,
    }

    impl ScriptedCleaner {
        fn new(script: Vec<Result<(), CleanerError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl MarkdownCleaner for ScriptedCleaner {
        async fn clean(&self, page: &str) -> Result<String, CleanerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            next.map(|_| page.to_uppercase())
        }
    }

    /// Never answers.
    struct HangingCleaner;

    #[async_trait]
    impl MarkdownCleaner for HangingCleaner {
        async fn clean(&self, _page: &str) -> Result<String, CleanerError> {
            futures::future::pending().await
        }
    }

    fn fast_config() -> ConversionConfig {
        ConversionConfig::builder()
            .retry_backoff_ms(1)
            .max_retries(3)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn cleans_pages_in_order() {
        let cleaner = ScriptedCleaner::new(vec![]);
        let stage = CleanupStage::new(cleaner.clone(), &fast_config());
        let (pages, report) = stage
            .run(vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(pages, vec!["A", "B", "C"]);
        assert_eq!(report.cleaned_pages, 3);
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn concurrent_cleanup_keeps_order() {
        let cleaner = ScriptedCleaner::new(vec![]);
        let config = ConversionConfig::builder()
            .cleanup_concurrency(4)
            .build()
            .unwrap();
        let stage = CleanupStage::new(cleaner, &config);
        let input: Vec<String> = (0..10).map(|i| format!("page {i}")).collect();
        let (pages, _) = stage.run(input).await.unwrap();
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page, &format!("PAGE {i}"));
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let cleaner = ScriptedCleaner::new(vec![
            Err(CleanerError::Transient("503".into())),
            Err(CleanerError::Transient("503".into())),
        ]);
        let stage = CleanupStage::new(cleaner.clone(), &fast_config());
        let (pages, report) = stage.run(vec!["x".into()]).await.unwrap();
        assert_eq!(pages, vec!["X"]);
        assert_eq!(cleaner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_stage() {
        let script = (0..10)
            .map(|_| Err(CleanerError::Transient("down".into())))
            .collect();
        let cleaner = ScriptedCleaner::new(script);
        let stage = CleanupStage::new(cleaner.clone(), &fast_config());
        let err = stage.run(vec!["x".into()]).await.unwrap_err();
        match err {
            ConvertError::Cleanup { page, attempts, .. } => {
                assert_eq!(page, 1);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cleaner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let cleaner = ScriptedCleaner::new(vec![Err(CleanerError::Permanent("400".into()))]);
        let stage = CleanupStage::new(cleaner.clone(), &fast_config());
        let err = stage.run(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, ConvertError::Cleanup { attempts: 1, .. }));
        assert_eq!(cleaner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_pages_skip_the_service() {
        let cleaner = ScriptedCleaner::new(vec![]);
        let stage = CleanupStage::new(cleaner.clone(), &fast_config());
        let (pages, report) = stage.run(vec!["".into(), "text".into()]).await.unwrap();
        assert_eq!(pages, vec!["", "TEXT"]);
        assert_eq!(cleaner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.cleaned_pages, 1);
    }

    #[tokio::test]
    async fn hanging_cleaner_times_out() {
        let config = ConversionConfig::builder()
            .cleanup_timeout_secs(1)
            .max_retries(0)
            .build()
            .unwrap();
        let stage = CleanupStage::new(Arc::new(HangingCleaner), &config);
        let err = stage.run(vec!["x".into()]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "got: {err}");
    }
}
