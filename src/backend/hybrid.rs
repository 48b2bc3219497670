//! Hybrid router: local tesseract first, VLM only when it matters.
//!
//! Routing per page:
//! 1. Run the primary engine. If it fails outright, go straight to the
//!    accurate engine.
//! 2. If primary confidence falls below the threshold, escalate.
//! 3. Otherwise scan the primary text for mantra content; a flagged page
//!    escalates regardless of confidence, because the primary's idea of
//!    "confident" is not good enough for a bīja syllable.
//! 4. If escalation itself fails, keep the primary text rather than failing
//!    the page — a lower-fidelity transcription beats a hole in the document.
//!
//! On a typical scripture scan 60-80% of pages stay on the free engine,
//! which is the whole economic point of this crate.

use super::{OcrEngine, RecognitionResult, TokenUsage};
use crate::detect::{EscalationTier, MantraDetector};
use crate::error::PageError;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Per-run routing counters, exposed for the end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HybridStats {
    pub total_pages: u64,
    /// Pages where the primary result was kept without escalation.
    pub primary_only: u64,
    /// Escalations triggered by low primary confidence.
    pub escalated_low_confidence: u64,
    /// Escalations triggered by mantra detection.
    pub escalated_mantra: u64,
    /// Pages sent to the accurate engine because the primary failed.
    pub primary_failed: u64,
    /// Escalations where the accurate engine failed and the primary text
    /// was kept as a fallback.
    pub escalation_fallback: u64,
}

impl HybridStats {
    /// Fraction of pages that never touched the metered engine.
    pub fn savings_pct(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        (self.primary_only + self.escalation_fallback) as f64 / self.total_pages as f64 * 100.0
    }
}

pub struct HybridEngine {
    primary: Arc<dyn OcrEngine>,
    accurate: Arc<dyn OcrEngine>,
    detector: MantraDetector,
    confidence_threshold: f32,
    stats: Mutex<HybridStats>,
    callback: Option<ProgressCallback>,
}

impl HybridEngine {
    pub fn new(
        primary: Arc<dyn OcrEngine>,
        accurate: Arc<dyn OcrEngine>,
        detector: MantraDetector,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            primary,
            accurate,
            detector,
            confidence_threshold,
            stats: Mutex::new(HybridStats::default()),
            callback: None,
        }
    }

    /// Attach a progress callback so escalations surface as events.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn stats(&self) -> HybridStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn bump(&self, f: impl FnOnce(&mut HybridStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn notify_escalation(&self, page: u32, reason: &str) {
        info!(page, reason, "escalating to accurate engine");
        if let Some(ref cb) = self.callback {
            cb.on_page_escalated(page, reason);
        }
    }
}

#[async_trait]
impl OcrEngine for HybridEngine {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn is_free(&self) -> bool {
        self.primary.is_free() && self.accurate.is_free()
    }

    fn cost_per_1000_pages(&self) -> f64 {
        // Only escalated pages hit the accurate engine.
        self.primary.cost_per_1000_pages() + self.accurate.cost_per_1000_pages() * 0.15
    }

    fn hybrid_stats(&self) -> Option<HybridStats> {
        Some(self.stats())
    }

    fn token_usage(&self) -> TokenUsage {
        let mut usage = self.primary.token_usage();
        usage.add(&self.accurate.token_usage());
        usage
    }

    async fn recognize(
        &self,
        page: u32,
        image: &DynamicImage,
    ) -> Result<RecognitionResult, PageError> {
        self.bump(|s| s.total_pages += 1);

        let primary = match self.primary.recognize(page, image).await {
            Ok(result) => result,
            Err(e) => {
                // Primary broke; the accurate engine is the only option left.
                warn!(page, error = %e, "primary engine failed, using accurate engine directly");
                self.notify_escalation(page, "primary engine failed");
                self.bump(|s| s.primary_failed += 1);
                let mut result = self.accurate.recognize(page, image).await?;
                result.engine = format!("hybrid:{}-fallback", self.accurate.name());
                return Ok(result);
            }
        };

        let escalation_reason = if primary.confidence < self.confidence_threshold {
            self.bump(|s| s.escalated_low_confidence += 1);
            Some(format!(
                "confidence {:.2} below threshold {:.2}",
                primary.confidence, self.confidence_threshold
            ))
        } else {
            let detection = self.detector.detect(&primary.text);
            match detection.tier {
                EscalationTier::None => None,
                tier => {
                    self.bump(|s| s.escalated_mantra += 1);
                    Some(format!(
                        "mantra content (score {:.2}, {} matches{})",
                        detection.score,
                        detection.mantra_count,
                        if tier == EscalationTier::HighPriority {
                            ", high priority"
                        } else {
                            ""
                        }
                    ))
                }
            }
        };

        let Some(reason) = escalation_reason else {
            debug!(page, confidence = primary.confidence, "keeping primary result");
            self.bump(|s| s.primary_only += 1);
            let mut result = primary;
            result.engine = format!("hybrid:{}", self.primary.name());
            return Ok(result);
        };

        self.notify_escalation(page, &reason);
        match self.accurate.recognize(page, image).await {
            Ok(mut accurate) => {
                accurate.engine =
                    format!("hybrid:{}+{}", self.primary.name(), self.accurate.name());
                Ok(accurate)
            }
            Err(e) => {
                // Keep the primary text: lower fidelity beats a missing page.
                warn!(page, error = %e, "escalation failed, keeping primary result");
                self.bump(|s| s.escalation_fallback += 1);
                let mut result = primary;
                result.engine = format!("hybrid:{}-fallback", self.primary.name());
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubEngine {
        label: &'static str,
        response: Result<(String, f32), String>,
        calls: AtomicU32,
    }

    impl StubEngine {
        fn ok(label: &'static str, text: &str, confidence: f32) -> Arc<Self> {
            Arc::new(Self {
                label,
                response: Ok((text.to_string(), confidence)),
                calls: AtomicU32::new(0),
            })
        }

        fn failing(label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                label,
                response: Err("engine down".to_string()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrEngine for StubEngine {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn recognize(
            &self,
            page: u32,
            _image: &DynamicImage,
        ) -> Result<RecognitionResult, PageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok((text, confidence)) => {
                    let mut result =
                        RecognitionResult::new(text.clone(), *confidence, self.label);
                    result.duration = std::time::Duration::from_millis(7);
                    Ok(result)
                }
                Err(detail) => Err(PageError::RecognitionFailed {
                    page,
                    attempts: 1,
                    detail: detail.clone(),
                }),
            }
        }
    }

    fn blank_image() -> DynamicImage {
        DynamicImage::new_rgb8(4, 4)
    }

    fn hybrid(primary: Arc<StubEngine>, accurate: Arc<StubEngine>) -> HybridEngine {
        HybridEngine::new(primary, accurate, MantraDetector::default(), 0.75)
    }

    #[tokio::test]
    async fn confident_prose_stays_on_primary() {
        let primary = StubEngine::ok("tesseract", "साधारण गद्य का अनुच्छेद", 0.92);
        let accurate = StubEngine::ok("vlm", "unused", 1.0);
        let engine = hybrid(Arc::clone(&primary), Arc::clone(&accurate));

        let result = engine.recognize(1, &blank_image()).await.unwrap();
        assert_eq!(result.engine, "hybrid:tesseract");
        assert_eq!(accurate.calls(), 0);
        assert_eq!(engine.stats().primary_only, 1);
    }

    #[tokio::test]
    async fn low_confidence_escalates_once() {
        let primary = StubEngine::ok("tesseract", "धुंधला पाठ", 0.4);
        let accurate = StubEngine::ok("vlm", "स्पष्ट पाठ", 1.0);
        let engine = hybrid(Arc::clone(&primary), Arc::clone(&accurate));

        let result = engine.recognize(3, &blank_image()).await.unwrap();
        assert_eq!(result.engine, "hybrid:tesseract+vlm");
        assert_eq!(result.text, "स्पष्ट पाठ");
        assert_eq!(accurate.calls(), 1);
        assert_eq!(engine.stats().escalated_low_confidence, 1);
    }

    #[tokio::test]
    async fn mantra_content_escalates_despite_high_confidence() {
        let primary = StubEngine::ok("tesseract", "ॐ ह्रीं श्रीं महालक्ष्म्यै नमः", 0.95);
        let accurate = StubEngine::ok("vlm", "ॐ ह्रीं श्रीं महालक्ष्म्यै नमः ॥१॥", 1.0);
        let engine = hybrid(Arc::clone(&primary), Arc::clone(&accurate));

        let result = engine.recognize(7, &blank_image()).await.unwrap();
        assert_eq!(result.engine, "hybrid:tesseract+vlm");
        assert_eq!(accurate.calls(), 1);
        assert_eq!(engine.stats().escalated_mantra, 1);
    }

    #[tokio::test]
    async fn result_labels_record_the_route_taken() {
        let image = blank_image();

        // Accepted primary: labeled hybrid:<primary>, not the bare engine name.
        let primary = StubEngine::ok("tesseract", "साधारण गद्य का अनुच्छेद", 0.92);
        let accurate = StubEngine::ok("vlm", "unused", 1.0);
        let engine = hybrid(primary, accurate);
        let kept = engine.recognize(1, &image).await.unwrap();
        assert!(
            kept.engine.starts_with("hybrid:"),
            "accepted primary result must carry the hybrid label, got {:?}",
            kept.engine
        );
        // Relabeling keeps the inner engine's timing.
        assert_eq!(kept.duration, std::time::Duration::from_millis(7));

        // Verified escalation: labeled hybrid:<primary>+<accurate>.
        let primary = StubEngine::ok("tesseract", "धुंधला पाठ", 0.4);
        let accurate = StubEngine::ok("vlm", "स्पष्ट पाठ", 1.0);
        let engine = hybrid(primary, accurate);
        let verified = engine.recognize(2, &image).await.unwrap();
        assert_eq!(verified.engine, "hybrid:tesseract+vlm");
    }

    #[tokio::test]
    async fn failed_escalation_keeps_primary_text() {
        let primary = StubEngine::ok("tesseract", "ॐ नमः शिवाय", 0.9);
        let accurate = StubEngine::failing("vlm");
        let engine = hybrid(Arc::clone(&primary), Arc::clone(&accurate));

        let result = engine.recognize(2, &blank_image()).await.unwrap();
        assert_eq!(result.text, "ॐ नमः शिवाय");
        assert_eq!(result.engine, "hybrid:tesseract-fallback");
        assert_eq!(engine.stats().escalation_fallback, 1);
    }

    #[tokio::test]
    async fn primary_failure_falls_through_to_accurate() {
        let primary = StubEngine::failing("tesseract");
        let accurate = StubEngine::ok("vlm", "उद्धृत पाठ सुरक्षित रहा", 1.0);
        let engine = hybrid(Arc::clone(&primary), Arc::clone(&accurate));

        let result = engine.recognize(5, &blank_image()).await.unwrap();
        assert_eq!(result.engine, "hybrid:vlm-fallback");
        assert_eq!(engine.stats().primary_failed, 1);
    }

    #[tokio::test]
    async fn both_engines_failing_fails_the_page() {
        let primary = StubEngine::failing("tesseract");
        let accurate = StubEngine::failing("vlm");
        let engine = hybrid(primary, accurate);

        let err = engine.recognize(9, &blank_image()).await.unwrap_err();
        assert_eq!(err.page(), 9);
    }

    #[test]
    fn savings_pct_counts_pages_kept_local() {
        let stats = HybridStats {
            total_pages: 10,
            primary_only: 7,
            escalation_fallback: 1,
            ..Default::default()
        };
        assert!((stats.savings_pct() - 80.0).abs() < 1e-9);
    }
}
