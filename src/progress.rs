//! Progress-callback trait for per-page grading events.
//!
//! Inject an [`Arc<dyn GradingProgressCallback>`] via
//! [`crate::config::ExaminerConfigBuilder::progress_callback`] to receive
//! events as each student page is sent to the model. Callers can forward
//! them to a progress bar, a log, or a channel without the library knowing
//! how the host application reports progress.
//!
//! # Example
//!
//! ```rust
//! use edgequake_examiner::{ExaminerConfig, GradingProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl GradingProgressCallback for Counter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, transcript_len: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num}/{total_pages} graded ({transcript_len} chars)");
//!     }
//! }
//!
//! let config = ExaminerConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it grades each student page.
///
/// Pages are graded concurrently, so `on_page_*` methods may be called from
/// different tasks at once and out of page order. All methods default to
/// no-ops.
pub trait GradingProgressCallback: Send + Sync {
    /// Called once after rendering, before any grading call.
    ///
    /// * `total_pages` — number of student pages that will be graded
    fn on_marking_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the grading request for a page is sent.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page was graded.
    ///
    /// * `transcript_len` — byte length of the cleaned model response
    fn on_page_complete(&self, page_num: usize, total_pages: usize, transcript_len: usize) {
        let _ = (page_num, total_pages, transcript_len);
    }

    /// Called when a page failed after all retries.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_marking_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GradingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExaminerConfig`].
pub type ProgressCallback = Arc<dyn GradingProgressCallback>;
