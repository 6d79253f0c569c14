//! Pipeline stages for marking an exam paper.
//!
//! Each submodule implements one transformation step. The two stages that
//! talk to the outside world (rendering and grading) sit behind traits so
//! the orchestrator can be driven by fakes in tests.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ postprocess ──▶ parser
//! (path/URL) (pdfium)  (base64)  (VLM)    (cleanup)     (records)
//! ```
//!
//! 1. [`input`]  — read a local path or download a URL into PDF bytes
//! 2. [`render`] — rasterise every page; pdfium runs in `spawn_blocking`
//! 3. [`encode`] — PNG-encode and base64-wrap each page image
//! 4. [`llm`]    — one grading call per student page, with retry/backoff
//! 5. [`postprocess`] — normalise each reply before concatenation

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
