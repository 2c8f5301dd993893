//! Conversion results.

use crate::config::PageSeparator;
use crate::mode::Mode;
use serde::{Deserialize, Serialize};

/// Every page of a converted document, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub mode: Mode,
    pub pages: Vec<String>,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Join the pages into one Markdown document.
    pub fn markdown(&self, separator: &PageSeparator) -> String {
        join_pages(&self.pages, separator)
    }
}

/// Aggregate statistics for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    /// Images (standalone or embedded) handed to the OCR engine.
    pub images_recognized: usize,
    /// Pages whose text was changed by defanging.
    pub pages_defanged: usize,
    /// Non-blank pages sent to the cleanup service.
    pub pages_cleaned: usize,
    /// Cleanup calls made, retries included.
    pub cleanup_attempts: u32,
    pub total_duration_ms: u64,
    /// Parsing, including OCR.
    pub extraction_duration_ms: u64,
    pub cleanup_duration_ms: u64,
}

/// Join pages with `separator`. Separators only go between pages.
pub fn join_pages(pages: &[String], separator: &PageSeparator) -> String {
    let mut out = String::new();
    for (idx, page) in pages.iter().enumerate() {
        if idx > 0 {
            out.push_str(&separator.render(idx + 1));
        }
        out.push_str(page);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_BREAK;

    #[test]
    fn separator_only_between_pages() {
        let pages = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(
            join_pages(&pages, &PageSeparator::PageBreak),
            format!("one{PAGE_BREAK}two{PAGE_BREAK}three")
        );
        assert_eq!(join_pages(&pages[..1], &PageSeparator::PageBreak), "one");
        assert_eq!(join_pages(&[], &PageSeparator::PageBreak), "");
    }

    #[test]
    fn stats_serialise_for_json_output() {
        let output = ConversionOutput {
            mode: Mode::HtmlArticle,
            pages: vec!["a".into()],
            stats: ConversionStats {
                total_pages: 1,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["mode"], "html_article");
        assert_eq!(json["stats"]["total_pages"], 1);
    }
}
