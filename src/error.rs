//! Error types for the edgequake-examiner library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExaminerError`] — **Fatal**: the marking request cannot proceed
//!   (quota exhausted, bad credential, unreadable PDF, provider not
//!   configured). Returned as `Err(ExaminerError)` from
//!   [`crate::examiner::Examiner`] operations.
//!
//! * [`PageError`] — **Non-fatal**: grading a single student page failed.
//!   Stored inside [`crate::output::PageTranscript`]. Whether it aborts the
//!   request is decided by [`crate::config::FailurePolicy`].
//!
//! The transcript parser has no error type at all: it degrades to empty
//! fields instead of failing.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-examiner library.
#[derive(Debug, Error)]
pub enum ExaminerError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The input was read, but is not a PDF.
    #[error("'{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password; exam uploads are expected to be unencrypted.
    #[error("PDF '{name}' is encrypted. Remove the password before uploading.")]
    PasswordRequired { name: String },

    /// The PDF opened but has no pages.
    #[error("PDF '{name}' has no pages")]
    EmptyDocument { name: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API rejected a grading call.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// A student page failed and the failure policy is fail-fast.
    #[error("Grading failed: {0}")]
    PageGradingFailed(PageError),

    /// Every student page failed; there is nothing to parse.
    #[error("All {total} pages failed to grade.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── Access errors ─────────────────────────────────────────────────────
    /// The identity has used up its allowance for the current period.
    #[error("Usage limit reached for {identity}: {used}/{limit} marking requests used this month")]
    QuotaExceeded {
        identity: String,
        used: u32,
        limit: u32,
    },

    /// Missing or invalid credential for an operation that needs one.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ── Storage errors ────────────────────────────────────────────────────
    /// The quota or submission store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single student page.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page image encoding failed.
    #[error("Page {page}: encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// LLM call failed after retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// LLM call timed out on the last attempt.
    #[error("Page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::EncodeFailed { page, .. }
            | PageError::LlmFailed { page, .. }
            | PageError::Timeout { page, .. } => *page,
        }
    }
}
