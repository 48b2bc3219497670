//! Pipeline stages for document OCR.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets tests swap implementations (a stub
//! rasteriser, a scripted engine) without touching the others.
//!
//! ## Data flow
//!
//! ```text
//! input ──▶ render ──▶ engine ──▶ cache ──▶ artifact
//! (URL/path) (pdfium) (+retry)  (per page) (merged .md)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`] — rasterise pages on demand; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`retry`]  — error classification and backoff schedules for the
//!    recognition loop
//! 4. [`run`]    — the coordinator: bounded dispatch, progress tracking,
//!    crash-safe caching, and finalize-always artifact assembly

pub mod input;
pub mod render;
pub mod retry;
pub mod run;

pub use input::{resolve_input, ResolvedInput};
pub use render::{PdfiumRasterizer, Rasterizer};
pub use retry::{classify_error, ErrorClass, RetryPolicy};
pub use run::{OcrPipeline, RunPhase, RunPlan, RunSummary, ShutdownToken};
