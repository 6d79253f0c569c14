//! VLM interaction: grade one student page against the mark scheme.
//!
//! [`GradingClient`] is the single-attempt seam to the model;
//! [`grade_page`] wraps any client with the per-call timeout and the
//! retry/backoff loop, and never propagates an error upward — a failed page
//! becomes a [`PageTranscript`] with `error` set so the orchestrator's
//! failure policy can decide what happens next.
//!
//! ## Retry Strategy
//!
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base
//! and 2 retries the waits are 500 ms → 1 s.

use crate::config::ExaminerConfig;
use crate::error::{ExaminerError, PageError};
use crate::output::PageTranscript;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Raw model reply for one student page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeResponse {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// One grading call: prompt + one student page + every scheme page → text.
#[async_trait]
pub trait GradingClient: Send + Sync {
    async fn grade(
        &self,
        prompt: &str,
        student_page: &ImageData,
        scheme_pages: &[ImageData],
    ) -> Result<GradeResponse, ExaminerError>;
}

/// [`GradingClient`] backed by an edgequake-llm vision provider.
pub struct VisionGrader {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl VisionGrader {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExaminerConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl GradingClient for VisionGrader {
    /// Sends a single user message: prompt text, then the student page,
    /// then every scheme page in order.
    async fn grade(
        &self,
        prompt: &str,
        student_page: &ImageData,
        scheme_pages: &[ImageData],
    ) -> Result<GradeResponse, ExaminerError> {
        let mut images = Vec::with_capacity(scheme_pages.len() + 1);
        images.push(student_page.clone());
        images.extend(scheme_pages.iter().cloned());

        let messages = vec![ChatMessage::user_with_images(prompt, images)];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ExaminerError::LlmApiError {
                message: e.to_string(),
            })?;

        Ok(GradeResponse {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Grade one student page with timeout and retries.
pub async fn grade_page(
    client: &Arc<dyn GradingClient>,
    page_num: usize,
    prompt: &str,
    student_page: &ImageData,
    scheme_pages: &[ImageData],
    config: &ExaminerConfig,
) -> PageTranscript {
    let start = Instant::now();
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let mut last_err: Option<PageError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, client.grade(prompt, student_page, scheme_pages)).await {
            Ok(Ok(response)) => {
                let duration = start.elapsed();
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num, response.input_tokens, response.output_tokens, duration
                );
                return PageTranscript {
                    page_num,
                    transcript: response.content,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt,
                    error: None,
                };
            }
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed — {}", page_num, attempt + 1, e);
                last_err = Some(PageError::LlmFailed {
                    page: page_num,
                    retries: config.max_retries,
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_num,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = Some(PageError::Timeout {
                    page: page_num,
                    secs: config.api_timeout_secs,
                });
            }
        }
    }

    PageTranscript {
        page_num,
        transcript: String::new(),
        input_tokens: 0,
        output_tokens: 0,
        duration_ms: start.elapsed().as_millis() as u64,
        retries: config.max_retries,
        error: Some(last_err.unwrap_or(PageError::LlmFailed {
            page: page_num,
            retries: config.max_retries,
            detail: "Unknown error".to_string(),
        })),
    }
}

/// Exponential delay before retry `attempt` (1-based), saturating at `u64::MAX`.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Build `CompletionOptions` from the examiner config.
fn build_options(config: &ExaminerConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
