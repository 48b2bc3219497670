//! Recognition engines and the hybrid router.
//!
//! Every engine implements [`OcrEngine`]: one rendered page in, recognised
//! text plus a confidence score out. The trait is the seam the pipeline and
//! the tests share — a mock engine slots in exactly where tesseract or the
//! VLM would.

mod hybrid;
mod tesseract;
mod vlm;

pub use hybrid::{HybridEngine, HybridStats};
pub use tesseract::TesseractEngine;
pub use vlm::VlmEngine;

use crate::config::{BackendChoice, OcrConfig};
use crate::detect::MantraDetector;
use crate::error::{OcrError, PageError};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Recognised text for one page, with provenance.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub text: String,
    /// Engine self-reported confidence in [0, 1]. Tesseract derives this from
    /// word-level scores; the VLM reports 1.0 on any validated response.
    pub confidence: f32,
    /// Label of the engine that produced the kept text, e.g. "hybrid:tesseract"
    /// for an accepted primary result, "hybrid:tesseract+vlm" for a verified
    /// escalation, or "hybrid:tesseract-fallback" when escalation failed.
    pub engine: String,
    pub tokens: TokenUsage,
    /// Wall-clock time the engine spent on this page, including rate-limiter
    /// waits and the subprocess or API call itself.
    pub duration: Duration,
}

impl RecognitionResult {
    pub fn new(text: String, confidence: f32, engine: impl Into<String>) -> Self {
        Self {
            text,
            confidence,
            engine: engine.into(),
            tokens: TokenUsage::default(),
            duration: Duration::ZERO,
        }
    }
}

// Gemini 2.5 Flash pricing, USD per million tokens.
const INPUT_COST_PER_MTOK: f64 = 0.50;
const OUTPUT_COST_PER_MTOK: f64 = 3.00;

/// Cumulative VLM token consumption and estimated spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub api_calls: u64,
}

impl TokenUsage {
    pub fn record(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.api_calls += 1;
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.api_calls += other.api_calls;
    }

    pub fn input_cost(&self) -> f64 {
        self.input_tokens as f64 * INPUT_COST_PER_MTOK / 1_000_000.0
    }

    pub fn output_cost(&self) -> f64 {
        self.output_tokens as f64 * OUTPUT_COST_PER_MTOK / 1_000_000.0
    }

    pub fn total_cost(&self) -> f64 {
        self.input_cost() + self.output_cost()
    }
}

/// A page-recognition engine.
///
/// `recognize` takes a rendered page image and returns text with confidence.
/// Implementations must be cheap to share behind an `Arc` — the pipeline
/// calls them from many concurrent tasks.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Stable engine label used in logs, cache metadata, and stats.
    fn name(&self) -> &'static str;

    /// Recognise one page. `page` is 1-indexed and used only for logging
    /// and error context.
    async fn recognize(&self, page: u32, image: &DynamicImage)
        -> Result<RecognitionResult, PageError>;

    /// True when recognition costs nothing per page.
    fn is_free(&self) -> bool {
        true
    }

    /// Estimated cost in USD of recognising 1000 typical pages.
    fn cost_per_1000_pages(&self) -> f64 {
        0.0
    }

    /// Routing counters, where the engine keeps them. Only the hybrid
    /// router does; plain engines report nothing.
    fn hybrid_stats(&self) -> Option<HybridStats> {
        None
    }

    /// Cumulative token consumption across every API call this engine made,
    /// including calls whose responses were rejected or retried. Engines
    /// that never call a metered API report zero.
    fn token_usage(&self) -> TokenUsage {
        TokenUsage::default()
    }
}

// Cost-estimate assumptions: a typical scanned page costs ~1000 input
// tokens (the image) and ~500 output tokens, and hybrid runs escalate
// roughly 15% of pages.
const AVG_INPUT_TOKENS_PER_PAGE: f64 = 1000.0;
const AVG_OUTPUT_TOKENS_PER_PAGE: f64 = 500.0;
const HYBRID_ESCALATION_RATIO: f64 = 0.15;

/// Rough per-page recognition cost in USD for the given backend, used for
/// dry-run estimates before any engine is built.
pub fn estimated_cost_per_page(backend: BackendChoice) -> f64 {
    let vlm = (AVG_INPUT_TOKENS_PER_PAGE * INPUT_COST_PER_MTOK
        + AVG_OUTPUT_TOKENS_PER_PAGE * OUTPUT_COST_PER_MTOK)
        / 1_000_000.0;
    match backend {
        BackendChoice::Tesseract => 0.0,
        BackendChoice::Vlm => vlm,
        BackendChoice::Hybrid => vlm * HYBRID_ESCALATION_RATIO,
    }
}

/// Construct the engine stack named by `config.backend`.
///
/// Hybrid wires tesseract as primary and the VLM as the accurate engine,
/// sharing the config's detection and threshold settings.
pub async fn build_engine(config: &OcrConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
    match config.backend {
        BackendChoice::Tesseract => Ok(Arc::new(TesseractEngine::new(&config.language))),
        BackendChoice::Vlm => Ok(Arc::new(VlmEngine::from_config(config).await?)),
        BackendChoice::Hybrid => {
            let primary = Arc::new(TesseractEngine::new(&config.language));
            let accurate = Arc::new(VlmEngine::from_config(config).await?);
            let mut engine = HybridEngine::new(
                primary,
                accurate,
                MantraDetector::new(config.strict_detection),
                config.confidence_threshold,
            );
            if let Some(ref cb) = config.progress_callback {
                engine = engine.with_callback(Arc::clone(cb));
            }
            Ok(Arc::new(engine))
        }
    }
}
