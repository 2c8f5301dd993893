//! System prompts for the two LLM collaborators: page cleanup and vision OCR.
//!
//! Keeping every prompt here means changing model behaviour touches exactly
//! one file, and unit tests can inspect prompts without calling a model.

use crate::ocr::Orientation;

/// Sentinel the OCR model answers with when an image carries no text.
pub const NO_TEXT_SENTINEL: &str = "[[NO_TEXT]]";

/// System prompt for [`crate::pipeline::llm::LlmMarkdownCleaner`].
pub const CLEANUP_SYSTEM_PROMPT: &str = r#"You are a meticulous Markdown editor. You receive ONE page of Markdown that was extracted automatically from a document (CSV, HTML, PDF or an image) and you return the same page, cleaned.

Follow these rules precisely:

1. CONTENT
   - Do NOT add, remove or summarise information
   - Do NOT translate
   - Keep every number, name, date and identifier exactly as written

2. STRUCTURE
   - Repair broken headings, lists and GFM tables
   - Join lines that were wrapped mid-sentence by the extractor
   - Remove duplicated whitespace and stray extraction artefacts

3. SAFETY
   - Indicators such as hxxp://, example[.]com, 10[.]0[.]0[.]1 and user[@]host are intentionally defanged
   - NEVER restore them to their live form

4. IMAGE TEXT
   - Keep every block starting with "> [image text N]" in place and unchanged

5. OUTPUT FORMAT
   - Output ONLY the cleaned Markdown for this page
   - Do NOT wrap it in ```markdown fences
   - Do NOT add commentary or explanations"#;

/// System prompt for [`crate::ocr::vision::VisionOcr`].
pub const OCR_SYSTEM_PROMPT: &str = r#"You are an OCR engine. Transcribe ALL text visible in the image, exactly as written.

Rules:
- Preserve the reading order and line breaks
- Do NOT describe the image, do NOT interpret or summarise
- Do NOT wrap the output in code fences
- If the image contains no readable text, answer exactly: [[NO_TEXT]]"#;

/// Extra instruction describing the expected image orientation.
pub fn orientation_hint(hint: Orientation) -> &'static str {
    match hint {
        Orientation::Auto => "The image may be rotated; detect the text orientation before reading.",
        Orientation::Upright => "The image is upright; read it as-is.",
    }
}

/// Build the full OCR system prompt for an orientation hint.
pub fn ocr_system_prompt(hint: Orientation) -> String {
    format!("{}\n- {}", OCR_SYSTEM_PROMPT, orientation_hint(hint))
}
