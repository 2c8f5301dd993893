//! Post-extraction stages applied to every page.
//!
//! Parsers hand back raw page Markdown; the stage chain rewrites it page by
//! page without ever changing the page count or order.
//!
//! ## Data Flow
//!
//! ```text
//! parser ──▶ normalize ──▶ defang ──▶ cleanup ──▶ defang
//!            (always)      (opt-in)   (opt-in)    (only after cleanup)
//! ```
//!
//! 1. [`normalize`]: deterministic whitespace and fence tidy-up
//! 2. [`defang`]: neutralise URLs, IPs and e-mail addresses
//! 3. [`cleanup`]: hand each page to a [`MarkdownCleaner`] with retry
//! 4. [`defang`] again when a cleaner ran, since a model may rewrite
//!    `hxxp` back to `http`. Defanging is idempotent so the second pass is
//!    a no-op on untouched text.
//!
//! [`llm`] holds the production cleaner over an `edgequake-llm` provider.

pub mod cleanup;
pub mod defang;
pub mod llm;
pub mod normalize;

pub use cleanup::{CleanupReport, CleanupStage, MarkdownCleaner};
pub use defang::{DefangPolicy, DefangRule, Defanger};
pub use llm::LlmMarkdownCleaner;

use crate::config::ConversionConfig;
use crate::error::ConvertError;
use std::time::Instant;
use tracing::{debug, info};

/// One step of the chain.
#[derive(Clone)]
pub enum Stage {
    Normalize,
    Defang(Defanger),
    Cleanup(CleanupStage),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Defang(_) => "defang",
            Stage::Cleanup(_) => "cleanup",
        }
    }
}

/// What the chain did to a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Pages whose text changed during the first defang pass.
    pub pages_defanged: usize,
    pub cleanup: CleanupReport,
    pub cleanup_duration_ms: u64,
}

/// Build the ordered stage list for `config`.
pub fn build_stages(config: &ConversionConfig) -> Vec<Stage> {
    let mut stages = vec![Stage::Normalize];
    let defanger = config
        .defang_enabled
        .then(|| Defanger::new(config.defang_policy.clone()));

    if let Some(ref d) = defanger {
        stages.push(Stage::Defang(d.clone()));
    }
    if let Some(ref cleaner) = config.cleaner {
        stages.push(Stage::Cleanup(CleanupStage::new(cleaner.clone(), config)));
        if let Some(d) = defanger {
            stages.push(Stage::Defang(d));
        }
    }
    stages
}

/// Run `stages` in order over `pages`.
pub async fn run_stages(
    stages: &[Stage],
    mut pages: Vec<String>,
) -> Result<(Vec<String>, StageReport), ConvertError> {
    let mut report = StageReport::default();
    let mut defang_passes = 0;

    for stage in stages {
        debug!("Stage '{}' over {} pages", stage.name(), pages.len());
        pages = match stage {
            Stage::Normalize => pages.iter().map(|p| normalize::normalize_page(p)).collect(),
            Stage::Defang(defanger) => {
                defang_passes += 1;
                let out: Vec<String> = pages.iter().map(|p| defanger.defang(p)).collect();
                if defang_passes == 1 {
                    report.pages_defanged =
                        pages.iter().zip(&out).filter(|(before, after)| before != after).count();
                }
                out
            }
            Stage::Cleanup(cleanup) => {
                let start = Instant::now();
                let (cleaned, cleanup_report) = cleanup.run(pages).await?;
                report.cleanup_duration_ms = start.elapsed().as_millis() as u64;
                report.cleanup = cleanup_report;
                cleaned
            }
        };
    }

    info!(
        "Stages done: {} pages, {} defanged, {} cleaned",
        pages.len(),
        report.pages_defanged,
        report.cleanup.cleaned_pages
    );
    Ok((pages, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CleanerError;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Puts the fang back in, the way a careless model might.
    struct RefangingCleaner;

    #[async_trait]
    impl MarkdownCleaner for RefangingCleaner {
        async fn clean(&self, page: &str) -> Result<String, CleanerError> {
            Ok(page.replace("hxxp", "http").replace("[.]", "."))
        }
    }

    fn names(stages: &[Stage]) -> Vec<&'static str> {
        stages.iter().map(Stage::name).collect()
    }

    #[test]
    fn stage_order_follows_config() {
        let config = ConversionConfig::builder().defang_enabled(false).build().unwrap();
        assert_eq!(names(&build_stages(&config)), vec!["normalize"]);

        let config = ConversionConfig::default();
        assert_eq!(names(&build_stages(&config)), vec!["normalize", "defang"]);

        let config = ConversionConfig::builder()
            .cleaner(Arc::new(RefangingCleaner))
            .build()
            .unwrap();
        assert_eq!(
            names(&build_stages(&config)),
            vec!["normalize", "defang", "cleanup", "defang"]
        );

        let config = ConversionConfig::builder()
            .defang_enabled(false)
            .cleaner(Arc::new(RefangingCleaner))
            .build()
            .unwrap();
        assert_eq!(names(&build_stages(&config)), vec!["normalize", "cleanup"]);
    }

    #[tokio::test]
    async fn cleaner_cannot_refang_indicators() {
        let config = ConversionConfig::builder()
            .cleaner(Arc::new(RefangingCleaner))
            .build()
            .unwrap();
        let stages = build_stages(&config);
        let pages = vec!["see http://evil.example/x".to_string(), "nothing here".to_string()];

        let (out, report) = run_stages(&stages, pages).await.unwrap();
        assert_eq!(out[0], "see hxxp://evil[.]example/x");
        assert_eq!(out[1], "nothing here");
        assert_eq!(report.pages_defanged, 1);
        assert_eq!(report.cleanup.cleaned_pages, 2);
    }

    #[tokio::test]
    async fn page_count_is_preserved() {
        let stages = build_stages(&ConversionConfig::default());
        let pages = vec![String::new(), "a".into(), "  ".into()];
        let (out, _) = run_stages(&stages, pages).await.unwrap();
        assert_eq!(out.len(), 3);
    }
}
