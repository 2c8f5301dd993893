//! HTML → Markdown, for both `html` and `html_article`.
//!
//! The document is parsed with `scraper` (html5ever) and rendered by a
//! recursive DOM walk. The DOM is not `Send`, so the walk is a synchronous
//! pass producing plain strings: each embedded `<img>` leaves a placeholder
//! and each print page break leaves a break mark. The async part (fetching
//! and OCR'ing images) runs afterwards on those strings.

use super::resource::{self, ImageFetcher, ImageSource};
use super::{Document, ParseContext, Parser};
use crate::error::{ConvertError, ExtractionStage};
use crate::mode::Mode;
use crate::ocr::{image_text_block, PendingImage};
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use futures::stream::{self, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, info};

/// Separates pages inside the rendered string.
const BREAK: char = '\u{000C}';
/// Wraps the index of an image rendered as a block.
const IMG: char = '\u{FFFC}';
/// Wraps the index of an image inside a table cell.
const CELL_IMG: char = '\u{FFF9}';

pub struct HtmlParser {
    article: bool,
}

impl HtmlParser {
    /// Render the whole `<body>`.
    pub fn full() -> Self {
        Self { article: false }
    }

    /// Render only the main content, without boilerplate.
    pub fn article() -> Self {
        Self { article: true }
    }
}

#[async_trait]
impl Parser for HtmlParser {
    fn mode(&self) -> Mode {
        if self.article {
            Mode::HtmlArticle
        } else {
            Mode::Html
        }
    }

    async fn parse(&self, doc: &Document, ctx: &ParseContext<'_>) -> Result<Vec<String>, ConvertError> {
        let mode = self.mode();
        let ocr = ctx.embedded_ocr();
        let text = decode_text(&doc.bytes);
        let rendered = render_html(&text, self.article, ocr.is_some());
        info!(
            "{}: {} page segment(s), {} image(s) to OCR",
            mode,
            rendered.pages.len(),
            rendered.images.len()
        );

        // Each image is fetched inside its OCR slot, so at most
        // `ocr_concurrency` images are held in memory at once.
        let blocks: Vec<String> = match ocr {
            Some(runner) if !rendered.images.is_empty() => {
                let sources: Vec<ImageSource> = rendered
                    .images
                    .iter()
                    .map(|src| resource::classify(src, doc.base_dir()))
                    .collect();
                let total = sources.len();
                let fetcher = ImageFetcher::new(mode, &sources, ctx.config.fetch_timeout_secs)?;
                let fetcher = &fetcher;

                stream::iter(sources.into_iter().enumerate().map(move |(idx, source)| async move {
                    let pending = PendingImage {
                        page: None,
                        source: fetcher.fetch(&source).await,
                        source_stage: ExtractionStage::Fetch,
                    };
                    let text = runner.recognize_one(mode, idx + 1, total, pending).await?;
                    Ok::<_, ConvertError>(image_text_block(idx + 1, &text))
                }))
                .buffered(runner.concurrency())
                .try_collect()
                .await?
            }
            _ => Vec::new(),
        };

        Ok(rendered
            .pages
            .iter()
            .map(|page| substitute_images(page, &blocks))
            .collect())
    }
}

static RE_META_CHARSET: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r#"(?i-u)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).unwrap()
});

/// How many leading bytes are searched for a `<meta charset>`.
const CHARSET_PRESCAN: usize = 1024;

/// The encoding a `<meta charset>` (or `http-equiv` content type) declares.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(CHARSET_PRESCAN)];
    let label = RE_META_CHARSET.captures(head)?.get(1)?;
    // A page that claims UTF-16 in ASCII-compatible markup is really UTF-8.
    Encoding::for_label(label.as_bytes()).map(Encoding::output_encoding)
}

/// Decode to text: BOM first, then `<meta charset>`, then UTF-8, falling
/// back to windows-1252 for undeclared legacy pages.
fn decode_text(bytes: &[u8]) -> String {
    let encoding = declared_encoding(bytes).unwrap_or_else(|| {
        if std::str::from_utf8(bytes).is_ok() {
            UTF_8
        } else {
            WINDOWS_1252
        }
    });
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("HTML decoded as {} with replacement characters", used.name());
    }
    text.into_owned()
}

/// Output of the synchronous DOM pass.
#[derive(Debug, Default)]
pub struct RenderedHtml {
    /// Page texts with image placeholders.
    pub pages: Vec<String>,
    /// `src` of every embedded image, in document order.
    pub images: Vec<String>,
}

/// Render an HTML document to Markdown pages.
///
/// With `collect_images` off, images contribute only their alt text and
/// no placeholders are produced.
pub fn render_html(html: &str, article: bool, collect_images: bool) -> RenderedHtml {
    let dom = Html::parse_document(html);
    let (root, inside_content) = if article {
        article_root(&dom)
    } else {
        let body = dom.select(&SEL_BODY).next().unwrap_or_else(|| dom.root_element());
        (body, false)
    };

    let mut walker = DomWalker {
        article,
        inside_content,
        collect_images,
        in_cell: false,
        images: Vec::new(),
    };
    let body = walker.blocks(root, "\n\n");

    let mut pages: Vec<String> = body
        .split(BREAK)
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.is_empty())
        .collect();
    if pages.is_empty() {
        pages.push(String::new());
    }
    debug!("DOM walk: {} pages, {} images", pages.len(), walker.images.len());

    RenderedHtml {
        pages,
        images: walker.images,
    }
}

// ── Article extraction ───────────────────────────────────────────────────

static SEL_BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

static SEL_MAIN_CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article", "main", "[role=main]", "body"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static RE_BOILERPLATE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(ads?|advert\w*|banner|breadcrumbs?|comments?|cookies?|cookie-\w+|footer|menu|nav\w*|newsletter|popup|promo\w*|related|share|sharing|sidebar|social|sponsor\w*|subscribe)\b",
    )
    .unwrap()
});

const BOILERPLATE_TAGS: &[&str] = &["nav", "aside", "form", "iframe", "button"];

/// Page chrome when found around the content, but the article's own
/// title block or byline when found inside `<article>` / `<main>`.
const SECTIONING_TAGS: &[&str] = &["header", "footer"];

const BOILERPLATE_ROLES: &[&str] = &["navigation", "banner", "contentinfo", "complementary"];

/// The content root, and whether it is a real content element rather
/// than the `<body>` fallback.
fn article_root(dom: &Html) -> (ElementRef<'_>, bool) {
    SEL_MAIN_CONTENT
        .iter()
        .find_map(|sel| dom.select(sel).next())
        .map(|el| (el, !matches!(el.value().name(), "body" | "html")))
        .unwrap_or_else(|| (dom.root_element(), false))
}

fn is_boilerplate(el: &ElementRef<'_>, inside_content: bool) -> bool {
    let e = el.value();
    if BOILERPLATE_TAGS.contains(&e.name()) {
        return true;
    }
    if !inside_content && SECTIONING_TAGS.contains(&e.name()) {
        return true;
    }
    if let Some(role) = e.attr("role") {
        if BOILERPLATE_ROLES.contains(&role.trim().to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    e.id().is_some_and(|id| RE_BOILERPLATE_NAME.is_match(id))
        || e.classes().any(|c| RE_BOILERPLATE_NAME.is_match(c))
}

// ── Page breaks ──────────────────────────────────────────────────────────

static RE_PAGE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:page-break-(before|after)\s*:\s*(?:always|page)|(?:^|[;\s])break-(before|after)\s*:\s*page)",
    )
    .unwrap()
});

/// `(break_before, break_after)` declared in an inline style.
fn page_breaks(el: &ElementRef<'_>) -> (bool, bool) {
    let Some(style) = el.value().attr("style") else {
        return (false, false);
    };
    let mut before = false;
    let mut after = false;
    for caps in RE_PAGE_BREAK.captures_iter(style) {
        let side = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_ascii_lowercase());
        match side.as_deref() {
            Some("before") => before = true,
            Some("after") => after = true,
            _ => {}
        }
    }
    (before, after)
}

// ── DOM walk ─────────────────────────────────────────────────────────────

const NEVER_RENDERED: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "center", "dd", "details", "div", "dl",
    "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5",
    "h6", "header", "hr", "html", "li", "main", "nav", "ol", "p", "pre", "section", "summary",
    "table", "ul",
];

struct DomWalker {
    article: bool,
    inside_content: bool,
    collect_images: bool,
    in_cell: bool,
    images: Vec<String>,
}

impl DomWalker {
    fn skipped(&self, el: &ElementRef<'_>) -> bool {
        NEVER_RENDERED.contains(&el.value().name())
            || (self.article && is_boilerplate(el, self.inside_content))
    }

    /// Render the children of `el` as Markdown blocks joined by `sep`.
    fn blocks(&mut self, el: ElementRef<'_>, sep: &str) -> String {
        let mut out: Vec<String> = Vec::new();
        let mut para = String::new();

        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                if self.skipped(&child_el) {
                    continue;
                }
                let (before, after) = page_breaks(&child_el);
                if before {
                    flush_paragraph(&mut para, &mut out);
                    out.push(BREAK.to_string());
                }
                if BLOCK_TAGS.contains(&child_el.value().name()) {
                    flush_paragraph(&mut para, &mut out);
                    let block = self.block(child_el);
                    if !block.trim().is_empty() {
                        out.push(block);
                    }
                } else {
                    let inline = self.inline(child_el);
                    para.push_str(&inline);
                }
                if after {
                    flush_paragraph(&mut para, &mut out);
                    out.push(BREAK.to_string());
                }
            } else if let Node::Text(text) = child.value() {
                para.push_str(&collapse_whitespace(text));
            }
        }
        flush_paragraph(&mut para, &mut out);
        out.join(sep)
    }

    fn block(&mut self, el: ElementRef<'_>) -> String {
        let name = el.value().name();
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let text = self.inline_children(el);
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    String::new()
                } else {
                    format!("{} {}", "#".repeat(level), text)
                }
            }
            "p" => {
                let mut out = Vec::new();
                let mut para = self.inline_children(el);
                flush_paragraph(&mut para, &mut out);
                out.join("\n\n")
            }
            "hr" => "---".to_string(),
            "ul" | "ol" => self.list(el, name == "ol"),
            "table" => self.table(el),
            "pre" => code_block(el),
            "blockquote" => {
                let inner = self.blocks(el, "\n\n");
                inner
                    .lines()
                    .map(|line| {
                        if line.is_empty() {
                            ">".to_string()
                        } else {
                            format!("> {line}")
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            _ => self.blocks(el, "\n\n"),
        }
    }

    fn list(&mut self, el: ElementRef<'_>, ordered: bool) -> String {
        let start = if ordered {
            el.value()
                .attr("start")
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(1)
        } else {
            1
        };

        let entries: Vec<ElementRef<'_>> = el
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| c.value().name() == "li" && !self.skipped(c))
            .collect();

        let mut items = Vec::new();
        for (i, item) in entries.into_iter().enumerate() {
            let marker = if ordered {
                format!("{}. ", start + i)
            } else {
                "- ".to_string()
            };
            let indent = " ".repeat(marker.len());
            let body = self.blocks(item, "\n");
            let mut lines = body.lines();
            let first = lines.next().unwrap_or("");
            let mut rendered = format!("{marker}{first}").trim_end().to_string();
            for line in lines {
                rendered.push('\n');
                if !line.trim().is_empty() {
                    rendered.push_str(&indent);
                    rendered.push_str(line);
                }
            }
            items.push(rendered);
        }
        items.join("\n")
    }

    fn table(&mut self, el: ElementRef<'_>) -> String {
        let mut rows: Vec<Vec<String>> = Vec::new();
        self.collect_rows(el, &mut rows);
        if rows.is_empty() {
            return String::new();
        }
        super::csv::render_table(&rows)
    }

    fn collect_rows(&mut self, el: ElementRef<'_>, rows: &mut Vec<Vec<String>>) {
        for child in el.children().filter_map(ElementRef::wrap) {
            match child.value().name() {
                "thead" | "tbody" | "tfoot" => self.collect_rows(child, rows),
                "tr" => {
                    let was_in_cell = std::mem::replace(&mut self.in_cell, true);
                    let row: Vec<String> = child
                        .children()
                        .filter_map(ElementRef::wrap)
                        .filter(|c| matches!(c.value().name(), "td" | "th"))
                        .map(|cell| {
                            let text = self.inline_children(cell);
                            text.split('\n')
                                .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
                                .filter(|l| !l.is_empty())
                                .collect::<Vec<_>>()
                                .join("\n")
                        })
                        .collect();
                    self.in_cell = was_in_cell;
                    if !row.is_empty() {
                        rows.push(row);
                    }
                }
                _ => {}
            }
        }
    }

    /// Render an inline element.
    fn inline(&mut self, el: ElementRef<'_>) -> String {
        if self.skipped(&el) {
            return String::new();
        }
        match el.value().name() {
            "br" => "\n".to_string(),
            "img" => self.image(el),
            "strong" | "b" => wrap_inline(&self.inline_children(el), "**"),
            "em" | "i" => wrap_inline(&self.inline_children(el), "*"),
            "code" | "kbd" | "samp" => {
                let code: String = el.text().collect();
                let code = collapse_whitespace(&code);
                if code.trim().is_empty() {
                    code
                } else {
                    format!("`{}`", code.trim())
                }
            }
            "a" => {
                let text = self.inline_children(el);
                let label = text.trim();
                match el.value().attr("href").map(str::trim) {
                    Some(href)
                        if !label.is_empty()
                            && !href.is_empty()
                            && !href.starts_with('#')
                            && !href.to_ascii_lowercase().starts_with("javascript:")
                            && !label.contains(IMG) =>
                    {
                        format!("[{label}]({href})")
                    }
                    _ => text,
                }
            }
            _ => self.inline_children(el),
        }
    }

    fn inline_children(&mut self, el: ElementRef<'_>) -> String {
        let mut out = String::new();
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                if BLOCK_TAGS.contains(&child_el.value().name()) && !self.skipped(&child_el) {
                    let gap = if self.in_cell { '\n' } else { ' ' };
                    out.push(gap);
                    out.push_str(&self.inline_children(child_el));
                    out.push(gap);
                } else {
                    out.push_str(&self.inline(child_el));
                }
            } else if let Node::Text(text) = child.value() {
                out.push_str(&collapse_whitespace(text));
            }
        }
        out
    }

    fn image(&mut self, el: ElementRef<'_>) -> String {
        let src = el.value().attr("src").map(str::trim).unwrap_or("");
        if self.collect_images && !src.is_empty() {
            self.images.push(src.to_string());
            let n = self.images.len();
            let mark = if self.in_cell { CELL_IMG } else { IMG };
            return format!("{mark}{n}{mark}");
        }
        let alt = el.value().attr("alt").map(strip_markers).unwrap_or_default();
        match alt.trim() {
            "" => String::new(),
            alt => format!("*{alt}*"),
        }
    }
}

fn code_block(el: ElementRef<'_>) -> String {
    let code: String = el.text().collect();
    let code = strip_markers(&code);
    let lang = el
        .children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == "code")
        .and_then(|c| {
            c.value()
                .classes()
                .find_map(|cls| cls.strip_prefix("language-").map(str::to_string))
        })
        .unwrap_or_default();
    let code = code.trim_matches('\n');
    if code.trim().is_empty() {
        return String::new();
    }
    format!("```{lang}\n{code}\n```")
}

fn is_marker(ch: char) -> bool {
    ch == BREAK || ch == IMG || ch == CELL_IMG
}

/// Drop our marker characters from text taken verbatim from the document.
fn strip_markers(text: &str) -> String {
    text.chars().filter(|&ch| !is_marker(ch)).collect()
}

/// Collapse runs of whitespace to one space and drop our marker characters.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for ch in text.chars() {
        if is_marker(ch) {
            continue;
        }
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

fn wrap_inline(inner: &str, marker: &str) -> String {
    let trimmed = inner.trim();
    if trimmed.is_empty() || trimmed.contains(IMG) {
        return inner.to_string();
    }
    let lead = if inner.starts_with(' ') { " " } else { "" };
    let trail = if inner.ends_with(' ') { " " } else { "" };
    format!("{lead}{marker}{trimmed}{marker}{trail}")
}

fn flush_paragraph(para: &mut String, out: &mut Vec<String>) {
    let text = para
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if !text.is_empty() {
        out.push(text.to_string());
    }
    para.clear();
}

// ── Image substitution ───────────────────────────────────────────────────

enum Piece<'a> {
    Text(&'a str),
    Image(usize),
}

/// Split a line into text and image placeholders.
fn split_placeholders(line: &str, mark: char) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = line;
    while let Some(start) = rest.find(mark) {
        let after = &rest[start + mark.len_utf8()..];
        let Some(end) = after.find(mark) else { break };
        let Ok(n) = after[..end].parse::<usize>() else { break };
        pieces.push(Piece::Text(&rest[..start]));
        pieces.push(Piece::Image(n));
        rest = &after[end + mark.len_utf8()..];
    }
    pieces.push(Piece::Text(rest));
    pieces
}

fn block_for(blocks: &[String], n: usize) -> &str {
    blocks.get(n.wrapping_sub(1)).map(String::as_str).unwrap_or("")
}

static RE_LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[-*+]|\d+[.)]) ").unwrap());

/// Replace placeholders with their recognised-text blocks.
///
/// A block placeholder becomes its own paragraph, carrying the line's
/// indentation or quote prefix; inside a list item it is indented to the
/// item's content so the list stays intact. A cell placeholder is
/// flattened with `<br>`.
fn substitute_images(page: &str, blocks: &[String]) -> String {
    if !page.contains(IMG) && !page.contains(CELL_IMG) {
        return page.to_string();
    }

    let mut out: Vec<String> = Vec::new();
    for line in page.split('\n') {
        let line = substitute_cells(line, blocks);
        if !line.contains(IMG) {
            if line.trim().is_empty() {
                push_blank(&mut out, "");
            } else {
                out.push(line);
            }
            continue;
        }
        let body = line.trim_start_matches([' ', '>']);
        let prefix = &line[..line.len() - body.len()];
        let blank = prefix.trim_end();
        let (marker, body) = match RE_LIST_MARKER.find(body) {
            Some(m) => (m.as_str().trim_end(), &body[m.end()..]),
            None => ("", body),
        };
        let inner = format!("{prefix}{}", " ".repeat(marker.len() + usize::from(!marker.is_empty())));

        // The marker goes on the first line written, the rest is indented under it.
        let mut lead = (!marker.is_empty()).then(|| format!("{prefix}{marker}"));
        for piece in split_placeholders(body, IMG) {
            match piece {
                Piece::Text(t) if t.trim().is_empty() => {}
                Piece::Text(t) => match lead.take() {
                    Some(first) => out.push(format!("{first} {}", t.trim())),
                    None => out.push(format!("{inner}{}", t.trim())),
                },
                Piece::Image(n) => {
                    if let Some(first) = lead.take() {
                        out.push(first);
                    }
                    push_blank(&mut out, blank);
                    for block_line in block_for(blocks, n).lines() {
                        out.push(format!("{inner}{block_line}"));
                    }
                    push_blank(&mut out, blank);
                }
            }
        }
    }
    out.join("\n").trim().to_string()
}

/// Separate paragraphs with one blank line, never two.
fn push_blank(out: &mut Vec<String>, blank: &str) {
    if out.last().is_some_and(|last| last.trim_end() != blank) {
        out.push(blank.to_string());
    }
}

fn substitute_cells(line: &str, blocks: &[String]) -> String {
    if !line.contains(CELL_IMG) {
        return line.to_string();
    }
    split_placeholders(line, CELL_IMG)
        .into_iter()
        .map(|piece| match piece {
            Piece::Text(t) => t.to_string(),
            Piece::Image(n) => block_for(blocks, n).replace('\n', "<br>"),
        })
        .collect()
}
