//! PDF → one page of Markdown per PDF page, via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not async-safe. All pdfium work (loading, walking page
//! objects, pulling raw image data) runs on the blocking pool and feeds a
//! bounded channel. Embedded images are OCR'd as they arrive, so only a
//! few are held in memory at once whatever the document size. When the
//! receiving side goes away (an OCR failure, or the conversion being
//! aborted) the extraction stops at its next send.
//!
//! ## Reading order
//!
//! pdfium hands back page objects in content-stream order, which is often
//! not reading order. Runs are sorted top to bottom (PDF y grows upwards),
//! then left to right; runs whose tops differ by less than
//! [`LINE_TOLERANCE_PT`] are treated as one line. Form XObjects (stamped
//! or imported pages) are walked recursively with their transform applied.

use super::{Document, ParseContext, Parser};
use crate::error::{ConvertError, ExtractionStage};
use crate::mode::Mode;
use crate::ocr::{image_text_block, OcrImage, OcrRunner, PendingImage};
use async_trait::async_trait;
use futures::future::{self, Either};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum top-edge difference (points) for two runs to share a line.
pub const LINE_TOLERANCE_PT: f32 = 3.0;

/// Horizontal gap between two runs, as a fraction of line height, below
/// which they belong to the same word.
pub const WORD_GAP_RATIO: f32 = 0.15;

pub struct PdfParser;

#[async_trait]
impl Parser for PdfParser {
    fn mode(&self) -> Mode {
        Mode::Pdf
    }

    async fn parse(&self, doc: &Document, ctx: &ParseContext<'_>) -> Result<Vec<String>, ConvertError> {
        let ocr = ctx.embedded_ocr();
        let bytes = doc.bytes.clone();
        let collect_images = ocr.is_some();
        let concurrency = ocr.map_or(1, |runner| runner.concurrency());

        let (tx, rx) = mpsc::channel(concurrency);
        let producer =
            tokio::task::spawn_blocking(move || extract_blocking(&bytes, collect_images, tx));

        let items = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed();
        let assembled = assemble(items, ocr, concurrency).await;

        // A load failure leaves the stream empty, so it takes precedence.
        producer
            .await
            .map_err(|e| ConvertError::Internal(format!("PDF extraction task panicked: {e}")))??;
        let pages = assembled?;
        info!("PDF: {} pages assembled", pages.len());
        Ok(pages)
    }
}

// ── Binding ──────────────────────────────────────────────────────────────

/// Bind to the pdfium shared library.
///
/// Search order: `PDFIUM_LIB_PATH` (a directory or the library file itself),
/// the working directory, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, String> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(custom) = std::env::var("PDFIUM_LIB_PATH") {
        let custom = PathBuf::from(custom);
        if custom.is_file() {
            candidates.push(custom);
        } else {
            candidates.push(Pdfium::pdfium_platform_library_name_at_path(&custom));
        }
    }
    candidates.push(Pdfium::pdfium_platform_library_name_at_path("./"));

    for path in &candidates {
        if let Ok(bindings) = Pdfium::bind_to_library(path) {
            debug!("Bound pdfium from {}", path.display());
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| {
            format!(
                "Failed to load the pdfium library ({e:?}). Searched: {:?} and the system library path. \
                 Set PDFIUM_LIB_PATH to the directory containing it.",
                candidates
            )
        })
}

// ── Extraction ───────────────────────────────────────────────────────────

/// A piece of a page in reading order.
#[derive(Debug, Clone, PartialEq)]
pub enum PageBlock {
    Text(String),
    /// Index into the document-wide image list.
    Image(usize),
}

/// What the extraction side sends, in document order. Every image
/// precedes the page it sits on.
#[derive(Debug)]
enum PdfItem {
    Loaded { pages: usize, images: usize },
    Image(PendingImage),
    Page(Vec<PageBlock>),
}

/// Page-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    top: f32,
    bottom: f32,
    left: f32,
    right: f32,
}

impl Rect {
    fn from_quad(quad: &PdfQuadPoints, transform: Option<&PdfMatrix>) -> Self {
        let corners = [
            (quad.left(), quad.bottom()),
            (quad.right(), quad.bottom()),
            (quad.left(), quad.top()),
            (quad.right(), quad.top()),
        ]
        .map(|(x, y)| match transform {
            Some(m) => m.apply_to_points(x, y),
            None => (x, y),
        });

        let mut rect = Rect {
            top: f32::MIN,
            bottom: f32::MAX,
            left: f32::MAX,
            right: f32::MIN,
        };
        for (x, y) in corners {
            rect.left = rect.left.min(x.value);
            rect.right = rect.right.max(x.value);
            rect.bottom = rect.bottom.min(y.value);
            rect.top = rect.top.max(y.value);
        }
        rect
    }
}

/// One positioned object on a page.
#[derive(Debug, Clone)]
struct Run {
    rect: Rect,
    content: RunContent,
}

#[derive(Debug, Clone)]
enum RunContent {
    Text(String),
    Image(usize),
}

fn load_error(e: PdfiumError) -> ConvertError {
    let detail = format!("{e:?}");
    let detail = if detail.to_lowercase().contains("password") {
        format!("document is encrypted: {detail}")
    } else {
        detail
    };
    ConvertError::extraction(Mode::Pdf, ExtractionStage::Load, None, detail)
}

/// Visit every leaf object under `object`, descending into Form XObjects.
///
/// Bounds of objects inside a form are in the form's space; `transform`
/// maps them to page space.
fn walk_objects(
    object: &PdfPageObject<'_>,
    transform: Option<PdfMatrix>,
    visit: &mut dyn FnMut(&PdfPageObject<'_>, Rect),
) {
    if let Some(form) = object.as_x_object_form_object() {
        let inner = match (object.matrix().ok(), transform) {
            (Some(own), Some(outer)) => Some(own.multiply(outer)),
            (Some(own), None) => Some(own),
            (None, outer) => outer,
        };
        for index in form.as_range() {
            if let Ok(child) = form.get(index) {
                walk_objects(&child, inner, visit);
            }
        }
        return;
    }
    if let Ok(bounds) = object.bounds() {
        visit(object, Rect::from_quad(&bounds, transform.as_ref()));
    }
}

fn count_images(pages: &PdfPages<'_>) -> usize {
    let mut count = 0;
    for page in pages.iter() {
        for object in page.objects().iter() {
            walk_objects(&object, None, &mut |object, _| {
                if object.as_image_object().is_some() {
                    count += 1;
                }
            });
        }
    }
    count
}

fn extract_blocking(
    bytes: &[u8],
    collect_images: bool,
    tx: mpsc::Sender<PdfItem>,
) -> Result<(), ConvertError> {
    let pdfium = bind_pdfium()
        .map_err(|e| ConvertError::extraction(Mode::Pdf, ExtractionStage::Load, None, e))?;
    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(load_error)?;
    let pages = document.pages();

    let total = pages.len() as usize;
    let images = if collect_images { count_images(pages) } else { 0 };
    info!("PDF loaded: {} pages, {} embedded images", total, images);
    if tx.blocking_send(PdfItem::Loaded { pages: total, images }).is_err() {
        return Ok(());
    }

    let mut next_image = 0;
    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let mut runs = Vec::new();
        let mut closed = false;

        for object in page.objects().iter() {
            walk_objects(&object, None, &mut |object, rect| {
                if closed {
                    return;
                }
                if let Some(text) = object.as_text_object() {
                    let text = text.text();
                    if !text.trim().is_empty() {
                        runs.push(Run {
                            rect,
                            content: RunContent::Text(text),
                        });
                    }
                } else if let Some(image) = object.as_image_object().filter(|_| collect_images) {
                    let source = image
                        .get_raw_image()
                        .map_err(|e| format!("{e:?}"))
                        .and_then(|img| {
                            OcrImage::from_dynamic(&img)
                                .map(|o| o.png)
                                .map_err(|e| e.to_string())
                        });
                    if let Err(ref reason) = source {
                        warn!("Page {}: cannot read embedded image: {}", page_num, reason);
                    }
                    runs.push(Run {
                        rect,
                        content: RunContent::Image(next_image),
                    });
                    next_image += 1;
                    let pending = PendingImage {
                        page: Some(page_num),
                        source,
                        source_stage: ExtractionStage::Render,
                    };
                    closed = tx.blocking_send(PdfItem::Image(pending)).is_err();
                }
            });
            if closed {
                debug!("PDF receiver dropped, stopping at page {}", page_num);
                return Ok(());
            }
        }

        debug!("Page {}: {} positioned runs", page_num, runs.len());
        if tx.blocking_send(PdfItem::Page(layout(runs))).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

enum Assembled {
    Nothing,
    Image(String),
    Page(Vec<PageBlock>),
}

/// OCR images as they stream in, at most `concurrency` at a time, and
/// render each page once its images are done.
async fn assemble<S>(
    items: S,
    runner: Option<&OcrRunner>,
    concurrency: usize,
) -> Result<Vec<String>, ConvertError>
where
    S: Stream<Item = PdfItem>,
{
    let mut images_total = 0;
    let mut next_image = 0;

    let (pages, _) = items
        .map(move |item| match item {
            PdfItem::Loaded { images, .. } => {
                images_total = images;
                Either::Left(future::ready(Ok::<_, ConvertError>(Assembled::Nothing)))
            }
            PdfItem::Page(blocks) => Either::Left(future::ready(Ok(Assembled::Page(blocks)))),
            PdfItem::Image(pending) => {
                next_image += 1;
                let (n, total) = (next_image, images_total);
                Either::Right(async move {
                    match runner {
                        Some(runner) => runner
                            .recognize_one(Mode::Pdf, n, total, pending)
                            .await
                            .map(|text| Assembled::Image(image_text_block(n, &text))),
                        None => Ok(Assembled::Nothing),
                    }
                })
            }
        })
        .buffered(concurrency.max(1))
        .try_fold(
            (Vec::new(), Vec::new()),
            |(mut pages, mut image_blocks), item| async move {
                match item {
                    Assembled::Image(block) => image_blocks.push(block),
                    Assembled::Page(blocks) => pages.push(assemble_page(&blocks, &image_blocks)),
                    Assembled::Nothing => {}
                }
                Ok::<_, ConvertError>((pages, image_blocks))
            },
        )
        .await?;
    Ok(pages)
}

/// Arrange runs into reading-order blocks.
fn layout(mut runs: Vec<Run>) -> Vec<PageBlock> {
    runs.sort_by(|a, b| {
        b.rect
            .top
            .total_cmp(&a.rect.top)
            .then(a.rect.left.total_cmp(&b.rect.left))
    });

    let mut lines: Vec<Vec<Run>> = Vec::new();
    for run in runs {
        match lines.last_mut() {
            Some(line) if (line[0].rect.top - run.rect.top).abs() < LINE_TOLERANCE_PT => line.push(run),
            _ => lines.push(vec![run]),
        }
    }

    let mut blocks = Vec::new();
    let mut para: Vec<String> = Vec::new();
    let mut prev: Option<(f32, f32)> = None; // (bottom, height) of the previous text line

    for mut line in lines {
        line.sort_by(|a, b| a.rect.left.total_cmp(&b.rect.left));
        let top = line.iter().map(|r| r.rect.top).fold(f32::MIN, f32::max);
        let bottom = line.iter().map(|r| r.rect.bottom).fold(f32::MAX, f32::min);

        let mut text = String::new();
        let mut last: Option<Rect> = None;
        for run in &line {
            match &run.content {
                RunContent::Text(t) => {
                    // Producers often split one word into several objects.
                    if let Some(prev_run) = last {
                        let height = (prev_run.top - prev_run.bottom).max(1.0);
                        if run.rect.left - prev_run.right > height * WORD_GAP_RATIO {
                            text.push(' ');
                        }
                    }
                    text.push_str(t.trim());
                    last = Some(run.rect);
                }
                RunContent::Image(i) => {
                    flush(&mut para, &mut blocks);
                    blocks.push(PageBlock::Image(*i));
                    prev = None;
                }
            }
        }
        if text.is_empty() {
            continue;
        }

        if let Some((prev_bottom, prev_height)) = prev {
            if prev_bottom - top > prev_height * 0.8 {
                flush(&mut para, &mut blocks);
            }
        }
        para.push(text);
        prev = Some((bottom, (top - bottom).max(1.0)));
    }
    flush(&mut para, &mut blocks);
    blocks
}

fn flush(para: &mut Vec<String>, blocks: &mut Vec<PageBlock>) {
    if !para.is_empty() {
        blocks.push(PageBlock::Text(para.join("\n")));
        para.clear();
    }
}

fn assemble_page(blocks: &[PageBlock], image_blocks: &[String]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            PageBlock::Text(t) => Some(t.clone()),
            PageBlock::Image(i) => image_blocks.get(*i).cloned(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! PDFs generated with pdfium at test time.
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    /// Returns `None` when pdfium cannot be bound on this machine.
    pub fn pdf_with_pages(pages: &[&[&str]], image_on: Option<usize>) -> Option<Vec<u8>> {
        let pdfium = bind_pdfium().ok()?;
        let mut document = pdfium.create_new_pdf().ok()?;
        let font = document.fonts_mut().helvetica();

        for (idx, lines) in pages.iter().enumerate() {
            let mut page = document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::a4())
                .ok()?;
            for (i, line) in lines.iter().enumerate() {
                page.objects_mut()
                    .create_text_object(
                        PdfPoints::new(72.0),
                        PdfPoints::new(760.0 - 18.0 * i as f32),
                        *line,
                        font,
                        PdfPoints::new(12.0),
                    )
                    .ok()?;
            }
            if image_on == Some(idx + 1) {
                let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                    64,
                    32,
                    Rgba([0, 0, 0, 255]),
                ));
                page.objects_mut()
                    .create_image_object(
                        PdfPoints::new(72.0),
                        PdfPoints::new(400.0),
                        &img,
                        Some(PdfPoints::new(128.0)),
                        Some(PdfPoints::new(64.0)),
                    )
                    .ok()?;
            }
        }
        document.save_to_bytes().ok()
    }

    /// One page whose only content is another page stamped in as a Form XObject.
    pub fn pdf_with_stamped_page(text: &str) -> Option<Vec<u8>> {
        let pdfium = bind_pdfium().ok()?;
        let mut source = pdfium.create_new_pdf().ok()?;
        let font = source.fonts_mut().helvetica();
        let mut page = source
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .ok()?;
        page.objects_mut()
            .create_text_object(
                PdfPoints::new(72.0),
                PdfPoints::new(760.0),
                text,
                font,
                PdfPoints::new(12.0),
            )
            .ok()?;

        let mut document = pdfium.create_new_pdf().ok()?;
        let form = page.objects().copy_into_x_object_form_object(&mut document).ok()?;
        let mut target = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .ok()?;
        target.objects_mut().add_object(form).ok()?;
        document.save_to_bytes().ok()
    }
}
