//! # mantra-ocr
//!
//! Resumable OCR for scanned Hindi/Sanskrit scripture, with hybrid routing
//! between a free local engine and a metered vision model.
//!
//! ## Why this crate?
//!
//! Liturgical texts are the worst case for OCR economics: a single wrong
//! syllable in a bīja mantra ruins the page, yet sending every page of a
//! 900-page scan to a metered vision API is needlessly expensive. This crate
//! runs tesseract on every page, scans the result for mantra patterns and
//! low-confidence output, and escalates only those pages to the VLM. The
//! rest stay free. Every recognised page is cached to disk immediately, so
//! a crash, rate-limit stall, or Ctrl-C costs nothing — the next run picks
//! up where the last one stopped.
//!
//! ## Pipeline overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Render    rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Recognise tesseract → mantra/confidence routing → VLM
//!  │               (token-bucket rate limiting, classified retry/backoff)
//!  ├─ 4. Cache     per-page atomic writes + progress saved after every page
//!  └─ 5. Finalize  merge cache into {stem}_unicode.md — always, even on
//!                  failure or interrupt
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mantra_ocr::{OcrConfig, OcrPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // VLM provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY
//!     let config = OcrConfig::builder()
//!         .concurrency(4)
//!         .requests_per_minute(30)
//!         .build()?;
//!     let pipeline = OcrPipeline::new(config);
//!     let summary = pipeline.run("scripture.pdf").await?;
//!     println!(
//!         "{}/{} pages done, ${:.4} spent",
//!         summary.completed, summary.requested, summary.tokens.total_cost()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mantra-ocr` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mantra-ocr = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod backend;
pub mod cache;
pub mod config;
pub mod detect;
pub mod error;
pub mod limiter;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{HybridEngine, HybridStats, OcrEngine, RecognitionResult, TesseractEngine, TokenUsage, VlmEngine};
pub use cache::PageCache;
pub use config::{BackendChoice, OcrConfig, OcrConfigBuilder, PageSelection};
pub use detect::{DetectionResult, EscalationTier, MantraDetector};
pub use error::{OcrError, PageError};
pub use limiter::TokenBucket;
pub use pipeline::{OcrPipeline, Rasterizer, RunPhase, RunPlan, RunSummary, ShutdownToken};
pub use progress::{NoopProgressCallback, OcrProgressCallback, ProgressCallback};
pub use state::ProgressState;
