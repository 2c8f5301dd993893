//! LLM-backed [`MarkdownCleaner`].
//!
//! Sends one page of extracted Markdown to an `edgequake-llm` provider and
//! returns its rewrite. All prompt text lives in [`crate::prompts`]; retry,
//! timeout and ordering live in [`crate::pipeline::cleanup::CleanupStage`].
//! This type only shapes a single request and classifies its failure.

use crate::error::CleanerError;
use crate::pipeline::cleanup::MarkdownCleaner;
use crate::pipeline::normalize::strip_markdown_fences;
use crate::prompts::CLEANUP_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Cleans pages with a chat-completion model.
pub struct LlmMarkdownCleaner {
    provider: Arc<dyn LLMProvider>,
    label: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmMarkdownCleaner {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        let label = format!("llm:{}", provider.name());
        Self {
            provider,
            label,
            system_prompt: CLEANUP_SYSTEM_PROMPT.to_string(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    /// Override the built-in cleanup instructions.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MarkdownCleaner for LlmMarkdownCleaner {
    fn name(&self) -> &str {
        &self.label
    }

    async fn clean(&self, page: &str) -> Result<String, CleanerError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user(page),
        ];

        // Provider errors cover 429/5xx and transport failures; all are retried.
        let response = self
            .provider
            .chat(&messages, Some(&self.build_options()))
            .await
            .map_err(|e| CleanerError::Transient(e.to_string()))?;

        debug!(
            "Cleanup call: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        // A page cut off at the token limit would silently lose its tail.
        if matches!(response.finish_reason.as_deref(), Some("length" | "max_tokens")) {
            return Err(CleanerError::Permanent(format!(
                "response truncated at {} output tokens (page is {} chars)",
                self.max_tokens,
                page.len()
            )));
        }

        let cleaned = strip_markdown_fences(&response.content);
        if cleaned.trim().is_empty() {
            return Err(CleanerError::Permanent(
                "model returned an empty page".to_string(),
            ));
        }
        Ok(cleaned)
    }
}
