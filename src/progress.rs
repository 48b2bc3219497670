//! Progress-callback trait for per-page OCR events.
//!
//! Inject an [`Arc<dyn OcrProgressCallback>`] via
//! [`crate::config::OcrConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline processes each page.
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a terminal progress bar, a log sink, or a channel without
//! the library knowing how the host application communicates. The trait is
//! `Send + Sync` because pages are recognised concurrently.

use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Methods may be called concurrently from different
/// tasks; implementations must protect shared mutable state.
pub trait OcrProgressCallback: Send + Sync {
    /// Called once before any page is dispatched.
    ///
    /// `pending` is the number of pages that will actually be processed this
    /// run; on a resumed run it excludes pages already cached.
    fn on_run_start(&self, total_pages: u32, pending: u32) {
        let _ = (total_pages, pending);
    }

    /// Called just before recognition starts for a page.
    fn on_page_start(&self, page: u32, total_pages: u32) {
        let _ = (page, total_pages);
    }

    /// Called when a page is recognised and cached.
    ///
    /// `engine` names the engine whose text was kept ("tesseract", "vlm",
    /// or a fallback label such as "tesseract-fallback").
    fn on_page_complete(&self, page: u32, total_pages: u32, engine: &str, confidence: f32) {
        let _ = (page, total_pages, engine, confidence);
    }

    /// Called when a page escalates from the primary to the accurate engine.
    fn on_page_escalated(&self, page: u32, reason: &str) {
        let _ = (page, reason);
    }

    /// Called when a page fails after all attempts are exhausted.
    fn on_page_failed(&self, page: u32, total_pages: u32, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once after all pages have been attempted, before the output
    /// artifact is assembled.
    fn on_run_complete(&self, total_pages: u32, completed: u32, failed: u32) {
        let _ = (total_pages, completed, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl OcrProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::OcrConfig`].
pub type ProgressCallback = Arc<dyn OcrProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TrackingCallback {
        completes: AtomicU32,
        escalations: AtomicU32,
        failures: AtomicU32,
    }

    impl OcrProgressCallback for TrackingCallback {
        fn on_page_complete(&self, _page: u32, _total: u32, _engine: &str, _confidence: f32) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_escalated(&self, _page: u32, _reason: &str) {
            self.escalations.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_failed(&self, _page: u32, _total: u32, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(5, 5);
        cb.on_page_start(1, 5);
        cb.on_page_complete(1, 5, "tesseract", 0.91);
        cb.on_page_escalated(2, "mantra content");
        cb.on_page_failed(3, 5, "render failed");
        cb.on_run_complete(5, 4, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            completes: AtomicU32::new(0),
            escalations: AtomicU32::new(0),
            failures: AtomicU32::new(0),
        };

        tracker.on_page_start(1, 3);
        tracker.on_page_complete(1, 3, "tesseract", 0.95);
        tracker.on_page_escalated(2, "low confidence 0.41");
        tracker.on_page_complete(2, 3, "vlm", 0.9);
        tracker.on_page_failed(3, 3, "recognition failed");

        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.escalations.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn OcrProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_run_start(10, 10);
        cb.on_page_complete(1, 10, "vlm", 1.0);
    }
}
