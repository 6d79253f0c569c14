//! Marking orchestrator: quota → render → encode → grade → parse → persist.
//!
//! [`Examiner`] owns the collaborators a marking request needs and runs them
//! in a fixed order. The quota slot is taken first, so a caller over its
//! limit never costs a render or a model call. Student pages are graded
//! concurrently, each call carrying the full mark scheme, and replies are
//! put back into student-page order before they are joined and parsed.

use crate::config::{ExaminerConfig, FailurePolicy, QuotaPolicy, DEFAULT_MODEL};
use crate::error::{ExaminerError, PageError};
use crate::history::{SubmissionRecord, SubmissionStore};
use crate::output::{MarkingOutput, MarkingStats, PageTranscript};
use crate::parser::parse_transcript;
use crate::pipeline::input::{self, PdfSource};
use crate::pipeline::llm::{self, GradingClient, VisionGrader};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::pipeline::{encode, postprocess};
use crate::prompts::DEFAULT_GRADING_PROMPT;
use crate::quota::{current_period, Identity, QuotaStore, UsageSnapshot};
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One marking request: who is asking, and the two uploaded PDFs.
#[derive(Debug, Clone)]
pub struct MarkRequest {
    pub identity: Identity,
    pub student: PdfSource,
    pub scheme: PdfSource,
}

/// Marks student papers against a mark scheme.
pub struct Examiner {
    config: ExaminerConfig,
    quota_policy: QuotaPolicy,
    renderer: Arc<dyn PageRenderer>,
    grader: Arc<dyn GradingClient>,
    quota: Arc<dyn QuotaStore>,
    history: Option<Arc<dyn SubmissionStore>>,
}

impl Examiner {
    /// Assemble an examiner from explicit collaborators.
    pub fn new(
        config: ExaminerConfig,
        renderer: Arc<dyn PageRenderer>,
        grader: Arc<dyn GradingClient>,
        quota: Arc<dyn QuotaStore>,
    ) -> Self {
        Self {
            config,
            quota_policy: QuotaPolicy::default(),
            renderer,
            grader,
            quota,
            history: None,
        }
    }

    /// Production wiring: pdfium renderer and a vision provider resolved
    /// from `config` and the environment.
    pub async fn from_config(
        config: ExaminerConfig,
        quota: Arc<dyn QuotaStore>,
    ) -> Result<Self, ExaminerError> {
        let provider = resolve_provider(&config).await?;
        info!("Using model {}", config.model_or_default());
        let renderer = Arc::new(PdfiumRenderer::new(config.max_rendered_pixels));
        let grader = Arc::new(VisionGrader::new(provider, &config));
        Ok(Self::new(config, renderer, grader, quota))
    }

    pub fn with_quota_policy(mut self, policy: QuotaPolicy) -> Self {
        self.quota_policy = policy;
        self
    }

    /// Save results of signed-in users to `store`.
    pub fn with_history(mut self, store: Arc<dyn SubmissionStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn config(&self) -> &ExaminerConfig {
        &self.config
    }

    /// Monthly allowance for `identity`.
    pub fn limit_for(&self, identity: &Identity) -> u32 {
        self.quota_policy.limit_for(identity)
    }

    /// Resolve two paths/URLs and mark them.
    pub async fn mark_inputs(
        &self,
        identity: Identity,
        student: &str,
        scheme: &str,
    ) -> Result<MarkingOutput, ExaminerError> {
        let timeout = self.config.download_timeout_secs;
        let (student, scheme) = tokio::try_join!(
            input::resolve_pdf(student, timeout),
            input::resolve_pdf(scheme, timeout)
        )?;
        self.mark(MarkRequest {
            identity,
            student,
            scheme,
        })
        .await
    }

    /// Mark a student paper.
    ///
    /// # Errors
    /// * `QuotaExceeded` — returned before anything else runs.
    /// * input/PDF errors for either document.
    /// * `PageGradingFailed` — a page failed under [`FailurePolicy::FailFast`].
    /// * `AllPagesFailed` — no page could be graded.
    ///
    /// The quota slot stays consumed when a later step fails.
    pub async fn mark(&self, request: MarkRequest) -> Result<MarkingOutput, ExaminerError> {
        let total_start = Instant::now();
        let MarkRequest {
            identity,
            student,
            scheme,
        } = request;
        info!(
            "Marking '{}' against '{}' for {}",
            student.file_name, scheme.file_name, identity
        );

        // ── Step 1: Quota ────────────────────────────────────────────────────
        let limit = self.limit_for(&identity);
        let decision = self.quota.check_and_increment(&identity, limit).await?;
        if !decision.allowed {
            info!("{} is over quota ({}/{})", identity, decision.used, limit);
            return Err(ExaminerError::QuotaExceeded {
                identity: identity.to_string(),
                used: decision.used,
                limit,
            });
        }
        let usage = UsageSnapshot::new(&identity, decision.used, limit, current_period());

        // ── Step 2: Render ───────────────────────────────────────────────────
        let render_start = Instant::now();
        let (student_images, scheme_images) = tokio::try_join!(
            self.renderer.render(&student),
            self.renderer.render(&scheme)
        )?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        info!(
            "Rendered {} student + {} scheme pages in {}ms",
            student_images.len(),
            scheme_images.len(),
            render_duration_ms
        );

        // ── Step 3: Encode ───────────────────────────────────────────────────
        let scheme_pages = scheme_images
            .iter()
            .enumerate()
            .map(|(idx, img)| {
                encode::encode_page(img).map_err(|e| ExaminerError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("Mark scheme image encoding failed: {}", e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let student_pages: Vec<(usize, Result<ImageData, PageError>)> = student_images
            .iter()
            .enumerate()
            .map(|(idx, img)| {
                let encoded = encode::encode_page(img).map_err(|e| PageError::EncodeFailed {
                    page: idx + 1,
                    detail: e.to_string(),
                });
                (idx + 1, encoded)
            })
            .collect();
        drop(student_images);
        drop(scheme_images);

        // ── Step 4: Grade ────────────────────────────────────────────────────
        let total_pages = student_pages.len();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_marking_start(total_pages);
        }
        let llm_start = Instant::now();
        let mut pages = self.grade_pages(student_pages, &scheme_pages).await?;
        let llm_duration_ms = llm_start.elapsed().as_millis() as u64;
        pages.sort_by_key(|p| p.page_num);

        let graded = pages.iter().filter(|p| p.is_ok()).count();
        let failed = pages.len() - graded;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_marking_complete(total_pages, graded);
        }
        if graded == 0 {
            let first_error = pages
                .iter()
                .find_map(|p| p.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(ExaminerError::AllPagesFailed {
                total: pages.len(),
                first_error,
            });
        }
        if failed > 0 {
            warn!("{} of {} student pages failed to grade", failed, total_pages);
        }

        // ── Step 5–6: Join and parse ─────────────────────────────────────────
        let transcript = postprocess::join_transcripts(
            pages
                .iter()
                .filter(|p| p.is_ok())
                .map(|p| p.transcript.as_str()),
        );
        let result = parse_transcript(&transcript);
        debug!(
            "Parsed {} questions, total '{}'",
            result.len(),
            result.total
        );

        // ── Step 7: Persist ──────────────────────────────────────────────────
        let submission_id = match (identity.uid(), &self.history) {
            (Some(uid), Some(store)) => {
                let record = SubmissionRecord::new(
                    uid,
                    student.file_name.as_str(),
                    scheme.file_name.as_str(),
                    result.clone(),
                );
                match store.save(&record).await {
                    Ok(()) => Some(record.id),
                    Err(e) => {
                        warn!("Could not save submission for {}: {}", identity, e);
                        None
                    }
                }
            }
            _ => None,
        };

        // ── Step 8: Stats ────────────────────────────────────────────────────
        let stats = MarkingStats {
            student_pages: total_pages,
            scheme_pages: scheme_pages.len(),
            graded_pages: graded,
            failed_pages: failed,
            total_input_tokens: pages.iter().map(|p| p.input_tokens as u64).sum(),
            total_output_tokens: pages.iter().map(|p| p.output_tokens as u64).sum(),
            render_duration_ms,
            llm_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Marking complete: {} questions, {}/{} pages, {}ms total",
            result.len(),
            graded,
            total_pages,
            stats.total_duration_ms
        );

        Ok(MarkingOutput {
            result,
            usage,
            submission_id,
            pages,
            stats,
        })
    }

    /// Current usage for `identity`; does not take a slot.
    pub async fn usage(&self, identity: &Identity) -> Result<UsageSnapshot, ExaminerError> {
        let used = self.quota.usage(identity).await?;
        Ok(UsageSnapshot::new(
            identity,
            used,
            self.limit_for(identity),
            current_period(),
        ))
    }

    /// Past submissions of a signed-in user, newest first.
    pub async fn history(&self, identity: &Identity) -> Result<Vec<SubmissionRecord>, ExaminerError> {
        let uid = require_user(identity)?;
        match &self.history {
            Some(store) => store.list_for(uid).await,
            None => Ok(Vec::new()),
        }
    }

    /// One past submission, if it exists and belongs to `identity`.
    pub async fn find_submission(
        &self,
        identity: &Identity,
        id: &str,
    ) -> Result<Option<SubmissionRecord>, ExaminerError> {
        let uid = require_user(identity)?;
        match &self.history {
            Some(store) => store.get(uid, id).await,
            None => Ok(None),
        }
    }

    /// Grade every student page, at most `concurrency` calls in flight.
    ///
    /// Results come back in completion order. Under fail-fast the first
    /// failed page ends the request and the calls still in flight are
    /// dropped.
    async fn grade_pages(
        &self,
        student_pages: Vec<(usize, Result<ImageData, PageError>)>,
        scheme_pages: &[ImageData],
    ) -> Result<Vec<PageTranscript>, ExaminerError> {
        let total_pages = student_pages.len();
        let prompt = self
            .config
            .grading_prompt
            .as_deref()
            .unwrap_or(DEFAULT_GRADING_PROMPT);
        let callback = self.config.progress_callback.as_ref();

        let mut in_flight = stream::iter(student_pages.into_iter().map(|(page_num, encoded)| {
            async move {
                if let Some(cb) = callback {
                    cb.on_page_start(page_num, total_pages);
                }
                let mut result = match encoded {
                    Ok(image) => {
                        llm::grade_page(
                            &self.grader,
                            page_num,
                            prompt,
                            &image,
                            scheme_pages,
                            &self.config,
                        )
                        .await
                    }
                    Err(e) => PageTranscript {
                        page_num,
                        error: Some(e),
                        ..Default::default()
                    },
                };
                if result.is_ok() {
                    result.transcript = postprocess::clean_transcript(&result.transcript);
                }
                if let Some(cb) = callback {
                    match &result.error {
                        None => cb.on_page_complete(page_num, total_pages, result.transcript.len()),
                        Some(e) => cb.on_page_error(page_num, total_pages, &e.to_string()),
                    }
                }
                result
            }
        }))
        .buffer_unordered(self.config.concurrency);

        let mut pages: Vec<PageTranscript> = Vec::with_capacity(total_pages);
        while let Some(page) = in_flight.next().await {
            if let Some(ref e) = page.error {
                if self.config.failure_policy == FailurePolicy::FailFast {
                    if let Some(cb) = callback {
                        let graded = pages.iter().filter(|p| p.is_ok()).count();
                        cb.on_marking_complete(total_pages, graded);
                    }
                    return Err(ExaminerError::PageGradingFailed(e.clone()));
                }
            }
            pages.push(page);
        }
        Ok(pages)
    }
}

fn require_user(identity: &Identity) -> Result<&str, ExaminerError> {
    identity
        .uid()
        .ok_or_else(|| ExaminerError::Unauthorized("history requires a signed-in user".into()))
}

// ── Provider resolution ──────────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExaminerError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExaminerError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the vision provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the API key comes
///    from the provider's usual environment variable.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub async fn resolve_provider(
    config: &ExaminerConfig,
) -> Result<Arc<dyn LLMProvider>, ExaminerError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    // Grading prompts are tuned against OpenAI models; prefer it when a key
    // is present even if other providers are configured too.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", config.model.as_deref().unwrap_or(DEFAULT_MODEL));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExaminerError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision model provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
