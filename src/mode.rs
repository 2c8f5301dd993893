//! The closed set of input modes.
//!
//! A mode names the structural kind of the input and selects exactly one
//! parser. Parsing a mode string is the very first thing a conversion does,
//! so an unknown mode is rejected before the input file is even opened.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Structural kind of an input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Comma-separated values, rendered as one Markdown table.
    Csv,
    /// Full HTML document.
    Html,
    /// HTML with navigation, ads and other boilerplate stripped first.
    HtmlArticle,
    /// A single raster image, OCR'd as one page.
    Image,
    /// PDF, one page per PDF page.
    Pdf,
}

impl Mode {
    /// Every supported mode, in help-text order.
    pub const ALL: [Mode; 5] = [
        Mode::Csv,
        Mode::Html,
        Mode::HtmlArticle,
        Mode::Image,
        Mode::Pdf,
    ];

    /// The name used on the command line and in output file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Csv => "csv",
            Mode::Html => "html",
            Mode::HtmlArticle => "html_article",
            Mode::Image => "image",
            Mode::Pdf => "pdf",
        }
    }

    /// Whether documents of this mode may contain images worth OCR'ing.
    pub fn has_embedded_images(self) -> bool {
        matches!(self, Mode::Html | Mode::HtmlArticle | Mode::Pdf)
    }

    /// Comma-separated list of all mode names.
    pub fn names() -> String {
        Mode::ALL
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| ConvertError::UnsupportedMode {
                mode: s.to_string(),
                supported: Mode::names(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_round_trips_through_its_name() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = "docx".parse::<Mode>().unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedMode { ref mode, .. } if mode == "docx"));
    }

    #[test]
    fn mode_names_are_case_sensitive() {
        assert!("PDF".parse::<Mode>().is_err());
        assert!("html-article".parse::<Mode>().is_err());
    }

    #[test]
    fn names_lists_every_mode() {
        assert_eq!(Mode::names(), "csv, html, html_article, image, pdf");
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Mode::HtmlArticle).unwrap();
        assert_eq!(json, "\"html_article\"");
    }
}
