//! # edgequake-examiner
//!
//! Mark scanned exam papers against an official mark scheme using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Handwritten answers do not survive text extraction. Instead this crate
//! rasterises every page of the student's paper and of the mark scheme, and
//! asks a VLM to grade each student page while looking at the whole scheme.
//! The model replies in a fixed line-oriented format which
//! [`parse_transcript`] turns into one [`QuestionRecord`] per question plus a
//! total.
//!
//! ## Pipeline Overview
//!
//! ```text
//! student.pdf + scheme.pdf
//!  │
//!  ├─ 1. Quota   check-and-increment the caller's monthly allowance
//!  ├─ 2. Render  rasterise both PDFs via pdfium (spawn_blocking)
//!  ├─ 3. Encode  PNG → base64 ImageData
//!  ├─ 4. VLM     one call per student page, all scheme pages attached
//!  ├─ 5. Clean   strip fences / invisible chars, join in page order
//!  ├─ 6. Parse   transcript → questions + total
//!  └─ 7. Save    submission history for signed-in users
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_examiner::{Examiner, ExaminerConfig, Identity, InMemoryQuotaStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let examiner =
//!         Examiner::from_config(ExaminerConfig::default(), Arc::new(InMemoryQuotaStore::new()))
//!             .await?;
//!     let output = examiner
//!         .mark_inputs(Identity::anonymous("localhost"), "answers.pdf", "scheme.pdf")
//!         .await?;
//!     for q in &output.result.questions {
//!         println!("Q{}: {} ({})", q.question_number, q.mark, q.comment);
//!     }
//!     println!("Total: {}", output.result.total);
//!     Ok(())
//! }
//! ```
//!
//! The parser needs no model at all:
//!
//! ```rust
//! use edgequake_examiner::parse_transcript;
//!
//! let result = parse_transcript("Question Number: 1\nMark: 2/3\n---\nTotal Marks: 2/3");
//! assert_eq!(result.questions[0].mark, "2/3");
//! assert_eq!(result.total, "2/3");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `examiner` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-examiner = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod error;
pub mod examiner;
pub mod history;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod quota;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{resolve_identity, StaticTokenVerifier, TokenVerifier};
pub use config::{ExaminerConfig, ExaminerConfigBuilder, FailurePolicy, QuotaPolicy, DEFAULT_MODEL};
pub use error::{ExaminerError, PageError};
pub use examiner::{resolve_provider, Examiner, MarkRequest};
pub use history::{InMemorySubmissionStore, JsonlSubmissionStore, SubmissionRecord, SubmissionStore};
pub use output::{MarkingOutput, MarkingStats, PageTranscript};
pub use parser::{parse_transcript, split_blocks, ParseResult, QuestionRecord};
pub use pipeline::input::{resolve_pdf, PdfSource};
pub use progress::{GradingProgressCallback, NoopProgressCallback, ProgressCallback};
pub use quota::{FileQuotaStore, Identity, InMemoryQuotaStore, QuotaDecision, QuotaStore, UsageSnapshot};
