//! Configuration types for exam marking.
//!
//! Everything that shapes a marking request lives in [`ExaminerConfig`],
//! built via [`ExaminerConfigBuilder`]. Usage limits are kept apart in
//! [`QuotaPolicy`] because they belong to the service operator, not to the
//! rendering/grading pipeline.

use crate::error::ExaminerError;
use crate::progress::ProgressCallback;
use crate::quota::Identity;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Upper bound for `max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for marking requests.
///
/// # Example
/// ```rust
/// use edgequake_examiner::{ExaminerConfig, FailurePolicy};
///
/// let config = ExaminerConfig::builder()
///     .concurrency(4)
///     .model("gpt-4.1")
///     .failure_policy(FailurePolicy::Partial)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExaminerConfig {
    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Handwriting needs more pixels than print to stay legible; 2000 px on the
    /// long edge keeps an A4 scan readable within the image token limits of
    /// the vision model.
    pub max_rendered_pixels: u32,

    /// Number of concurrent grading calls (one per student page). Default: 4.
    ///
    /// Every call carries all mark-scheme pages, so requests are large; keep
    /// this lower than a plain OCR pipeline would.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 — marking should be repeatable.
    pub temperature: f32,

    /// Maximum tokens the model may generate per student page. Default: 1000.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed grading call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom grading prompt. If None, uses [`crate::prompts::DEFAULT_GRADING_PROMPT`].
    pub grading_prompt: Option<String>,

    /// What to do when a student page fails to grade. Default: fail fast.
    pub failure_policy: FailurePolicy,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per grading-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExaminerConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1000,
            max_retries: 2,
            retry_backoff_ms: 500,
            grading_prompt: None,
            failure_policy: FailurePolicy::default(),
            download_timeout_secs: 120,
            api_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExaminerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExaminerConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("grading_prompt", &self.grading_prompt.as_ref().map(|p| p.len()))
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl ExaminerConfig {
    /// Create a new builder for `ExaminerConfig`.
    pub fn builder() -> ExaminerConfigBuilder {
        ExaminerConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model that will be requested from the provider.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`ExaminerConfig`].
pub struct ExaminerConfigBuilder {
    config: ExaminerConfig,
}

impl ExaminerConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn grading_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.grading_prompt = Some(prompt.into());
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExaminerConfig, ExaminerError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(ExaminerError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExaminerError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if let Some(prompt) = &c.grading_prompt {
            if prompt.trim().is_empty() {
                return Err(ExaminerError::InvalidConfig(
                    "grading prompt is empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a marking request reacts when one student page fails to grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Fail the whole request on the first failed page. (default)
    #[default]
    FailFast,
    /// Parse whatever pages succeeded; failed pages are reported per page.
    /// The request still fails if no page succeeds.
    Partial,
}

/// Monthly marking allowance per identity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// Requests per month for a signed-in user. Default: 10.
    pub user_limit: u32,
    /// Requests per month for an anonymous client. Default: 3.
    pub anonymous_limit: u32,
}

impl QuotaPolicy {
    /// Monthly allowance for `identity`.
    pub fn limit_for(&self, identity: &Identity) -> u32 {
        if identity.is_authenticated() {
            self.user_limit
        } else {
            self.anonymous_limit
        }
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            user_limit: 10,
            anonymous_limit: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExaminerConfig::default();
        assert_eq!(c.max_tokens, 1000);
        assert_eq!(c.failure_policy, FailurePolicy::FailFast);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
    }

    #[test]
    fn builder_clamps() {
        let c = ExaminerConfig::builder()
            .concurrency(0)
            .temperature(9.0)
            .max_rendered_pixels(10)
            .max_retries(u32::MAX)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_retries, MAX_RETRIES);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.max_rendered_pixels, 100);
    }

    #[test]
    fn builder_rejects_blank_prompt() {
        let err = ExaminerConfig::builder().grading_prompt("  \n").build();
        assert!(matches!(err, Err(ExaminerError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_zero_max_tokens() {
        let err = ExaminerConfig::builder().max_tokens(0).build();
        assert!(matches!(err, Err(ExaminerError::InvalidConfig(_))));
    }

    #[test]
    fn quota_policy_defaults() {
        let p = QuotaPolicy::default();
        assert_eq!(p.user_limit, 10);
        assert_eq!(p.anonymous_limit, 3);
        assert_eq!(p.limit_for(&Identity::user("u")), 10);
        assert_eq!(p.limit_for(&Identity::anonymous("c")), 3);
    }
}
