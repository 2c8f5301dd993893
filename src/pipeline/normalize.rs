//! Normalisation: deterministic whitespace cleanup of extracted Markdown.
//!
//! Every parser produces Markdown from a different source (table cells,
//! DOM text nodes, PDF text runs, OCR output), each with its own line-ending
//! and whitespace habits. This stage brings them to one shape before the
//! defang and cleanup stages see them.
//!
//! Rules (applied in order):
//! 1. Normalise line endings (CRLF / CR → LF)
//! 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 3. Trim trailing whitespace per line
//! 4. Collapse 2+ consecutive blank lines down to 1, outside fenced code
//! 5. Trim leading and trailing blank lines
//!
//! An empty page stays empty. All rules are idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every normalisation rule to one page.
pub fn normalize_page(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    trim_blank_edges(&s)
}

/// Strip a ```` ```markdown ```` fence wrapping the whole text.
///
/// Language models sometimes wrap their answer in a fence despite being
/// told not to.
pub fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Outer fences ─────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

/// The fence character and run length opening a code block, if `line` is a fence.
fn fence_of(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let ch = trimmed.chars().next().filter(|c| matches!(c, '`' | '~'))?;
    let len = trimmed.chars().take_while(|&c| c == ch).count();
    // Backtick fences cannot carry backticks in their info string.
    if len < 3 || (ch == '`' && trimmed[len..].contains('`')) {
        return None;
    }
    Some((ch, len))
}

fn collapse_blank_lines(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut open_fence: Option<(char, usize)> = None;
    let mut blank_run = 0;

    for line in input.split('\n') {
        if let Some(fence) = open_fence {
            // Code keeps its blank lines.
            if fence_of(line).is_some_and(|(ch, len)| ch == fence.0 && len >= fence.1) {
                open_fence = None;
            }
            out.push(line);
            continue;
        }
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
            open_fence = fence_of(line);
        }
        out.push(line);
    }
    out.join("\n")
}

// ── Rule 5: Trim blank edges ─────────────────────────────────────────────────

fn trim_blank_edges(input: &str) -> String {
    input.trim_matches('\n').to_string()
}
