//! The run coordinator: bounded dispatch, retries, resume, finalize-always.
//!
//! A run moves through four phases:
//!
//! * **Converting** — input resolved, page count read, cache and progress
//!   state reconciled, pending pages computed.
//! * **Dispatching** — pending pages flow through a `buffer_unordered`
//!   stream, at most `concurrency` in flight. Each page is rendered,
//!   recognised with retry, cached, and marked in the progress state the
//!   moment it completes.
//! * **Draining** — no new pages are launched (pending exhausted or
//!   shutdown requested); in-flight pages run to completion. Shutdown never
//!   abandons a page mid-recognition: a half-done page is a wasted API call.
//! * **Finalized** — the output artifact is rebuilt from the cache and the
//!   progress state is saved. This phase runs even when every page failed
//!   or the run was interrupted, so partial work is never stranded.

use crate::artifact;
use crate::backend::{self, HybridStats, OcrEngine, RecognitionResult, TokenUsage};
use crate::cache::PageCache;
use crate::config::{BackendChoice, OcrConfig};
use crate::error::{OcrError, PageError};
use crate::pipeline::input;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::retry::{classify_error, RetryPolicy};
use crate::state::{progress_file, ProgressState};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Cooperative shutdown flag, cloneable across tasks and signal handlers.
///
/// Requesting shutdown stops new pages from being dispatched; pages already
/// in flight finish and are cached, so an interrupted run loses nothing.
#[derive(Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where the coordinator currently is. See the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Converting,
    Dispatching,
    Draining,
    Finalized,
}

/// What a run accomplished. Counters cover this run only; cached pages from
/// earlier runs appear as `skipped_cached`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub document_id: String,
    pub total_pages: u32,
    /// Pages named by the page selection, clamped to the document.
    pub requested: u32,
    /// Requested pages already completed by an earlier run.
    pub skipped_cached: u32,
    pub completed: u32,
    pub failed: u32,
    pub output_file: PathBuf,
    pub tokens: TokenUsage,
    pub hybrid: Option<HybridStats>,
    pub duration: Duration,
    /// True when shutdown was requested before all pages were dispatched.
    pub interrupted: bool,
}

/// What a dry run would do, without doing it.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub document_id: String,
    pub total_pages: u32,
    pub requested: u32,
    pub cached: u32,
    pub pending: Vec<u32>,
    /// Rough wall-clock estimate assuming every pending page hits the
    /// metered engine at the configured rate.
    pub estimated_minutes: f64,
    /// Rough API spend in USD for the pending pages with this backend.
    pub estimated_cost: f64,
}

pub struct OcrPipeline {
    config: OcrConfig,
    shutdown: ShutdownToken,
    phase: Arc<Mutex<RunPhase>>,
}

impl OcrPipeline {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownToken::new(),
            phase: Arc::new(Mutex::new(RunPhase::Converting)),
        }
    }

    /// Token to hand to a Ctrl-C handler.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.lock().map(|p| *p).unwrap_or(RunPhase::Converting)
    }

    fn set_phase(phase: &Arc<Mutex<RunPhase>>, next: RunPhase) {
        if let Ok(mut p) = phase.lock() {
            if *p != next {
                info!(?next, "pipeline phase change");
                *p = next;
            }
        }
    }

    /// Run OCR over `input` (local path or URL), building the engine stack
    /// named by the config.
    pub async fn run(&self, input: &str) -> Result<RunSummary, OcrError> {
        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;

        if matches!(
            self.config.backend,
            BackendChoice::Tesseract | BackendChoice::Hybrid
        ) {
            crate::backend::TesseractEngine::check_available()?;
        }
        let engine = backend::build_engine(&self.config).await?;
        let rasterizer: Arc<dyn Rasterizer> = Arc::new(self.build_rasterizer(resolved.path()));

        self.run_with(resolved.path(), rasterizer, engine).await
    }

    /// Compute what a run would do: pages pending, pages already cached,
    /// and a rough time estimate. Touches no engine and writes nothing.
    pub async fn plan(&self, input: &str) -> Result<RunPlan, OcrError> {
        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
        let rasterizer = self.build_rasterizer(resolved.path());
        let total_pages = rasterizer.page_count().await?;
        self.check_selection(total_pages)?;

        let document_id = resolved.document_id();
        let requested = self.config.pages.resolve(total_pages);

        let state = ProgressState::load(&progress_file(resolved.path(), &document_id))
            .unwrap_or_else(|| ProgressState::new(&document_id, total_pages));
        let pending = state.pending_pages(&requested);
        let cached = requested.len() - pending.len();

        Ok(RunPlan {
            document_id,
            total_pages,
            requested: requested.len() as u32,
            cached: cached as u32,
            estimated_minutes: pending.len() as f64 / self.config.requests_per_minute as f64,
            estimated_cost: pending.len() as f64
                * backend::estimated_cost_per_page(self.config.backend),
            pending,
        })
    }

    fn build_rasterizer(&self, path: &Path) -> PdfiumRasterizer {
        let rasterizer = PdfiumRasterizer::new(path);
        match self.config.password {
            Some(ref password) => rasterizer.with_password(password),
            None => rasterizer,
        }
    }

    fn check_selection(&self, total_pages: u32) -> Result<(), OcrError> {
        if let Some(max) = self.config.pages.max_requested() {
            if max > total_pages {
                return Err(OcrError::PageOutOfRange {
                    page: max,
                    total: total_pages,
                });
            }
        }
        Ok(())
    }

    /// Run with explicit rasteriser and engine. This is the seam the
    /// integration tests use to drive the full coordinator with stubs.
    pub async fn run_with(
        &self,
        pdf_path: &Path,
        rasterizer: Arc<dyn Rasterizer>,
        engine: Arc<dyn OcrEngine>,
    ) -> Result<RunSummary, OcrError> {
        let start = Instant::now();
        Self::set_phase(&self.phase, RunPhase::Converting);

        let total_pages = rasterizer.page_count().await?;
        self.check_selection(total_pages)?;

        let document_id = input::document_id(pdf_path);
        let requested = self.config.pages.resolve(total_pages);
        let cache = Arc::new(
            PageCache::open(pdf_path, &document_id)
                .map_err(|e| OcrError::Internal(format!("failed to create cache dir: {e}")))?,
        );
        let state_path = progress_file(pdf_path, &document_id);
        let mut state = ProgressState::load(&state_path)
            .unwrap_or_else(|| ProgressState::new(&document_id, total_pages));

        // A crash between cache write and state save leaves the cache ahead
        // of the state; trust the cache.
        for page in cache.pages() {
            if requested.contains(&page) && !state.completed_pages.contains(&page) {
                info!(page, "reconciled cached page into progress state");
                state.mark_completed(page);
            }
        }
        state.save(&state_path)?;

        let pending = state.pending_pages(&requested);
        let skipped_cached = (requested.len() - pending.len()) as u32;
        info!(
            document = %document_id,
            total = total_pages,
            requested = requested.len(),
            cached = skipped_cached,
            pending = pending.len(),
            "run starting"
        );

        let callback = self.config.progress_callback.clone();
        if let Some(ref cb) = callback {
            cb.on_run_start(total_pages, pending.len() as u32);
        }

        let state = Arc::new(tokio::sync::Mutex::new(state));
        let policy = RetryPolicy::new(self.config.max_attempts, self.config.retry_base_secs);
        let dpi = self.config.dpi;
        // Rasterisation gets its own pool: recognition slots waiting on the
        // network should not each hold a rendering thread and a decoded
        // bitmap at the same time.
        let render_slots = Arc::new(tokio::sync::Semaphore::new(self.config.render_workers));

        Self::set_phase(&self.phase, RunPhase::Dispatching);

        // Stop yielding new pages the moment shutdown is requested; pages
        // already in flight keep running.
        let shutdown = self.shutdown.clone();
        let phase = Arc::clone(&self.phase);
        let mut page_iter = pending.clone().into_iter();
        let source = std::iter::from_fn(move || {
            if shutdown.is_requested() {
                Self::set_phase(&phase, RunPhase::Draining);
                return None;
            }
            let next = page_iter.next();
            if next.is_none() {
                Self::set_phase(&phase, RunPhase::Draining);
            }
            next
        });

        let results: Vec<(u32, Result<RecognitionResult, PageError>)> = stream::iter(source)
            .map(|page| {
                let rasterizer = Arc::clone(&rasterizer);
                let engine = Arc::clone(&engine);
                let cache = Arc::clone(&cache);
                let state = Arc::clone(&state);
                let state_path = state_path.clone();
                let callback = callback.clone();
                let shutdown = self.shutdown.clone();
                let render_slots = Arc::clone(&render_slots);
                async move {
                    if let Some(ref cb) = callback {
                        cb.on_page_start(page, total_pages);
                    }
                    let result = process_page(
                        page,
                        rasterizer.as_ref(),
                        engine.as_ref(),
                        policy,
                        dpi,
                        &render_slots,
                        &shutdown,
                    )
                    .await
                    .and_then(|r| {
                        cache.put(page, &r.text, &r.engine, r.confidence)?;
                        Ok(r)
                    });

                    // Persist progress immediately; a crash after this point
                    // costs nothing.
                    {
                        let mut state = state.lock().await;
                        match result {
                            Ok(_) => state.mark_completed(page),
                            Err(ref e) if !e.is_shutdown() => state.mark_failed(page),
                            Err(_) => {}
                        }
                        if let Err(e) = state.save(&state_path) {
                            warn!(page, error = %e, "failed to save progress state");
                        }
                    }

                    if let Some(ref cb) = callback {
                        match result {
                            Ok(ref r) => {
                                cb.on_page_complete(page, total_pages, &r.engine, r.confidence)
                            }
                            Err(ref e) if !e.is_shutdown() => {
                                cb.on_page_failed(page, total_pages, &e.to_string())
                            }
                            Err(_) => {}
                        }
                    }
                    (page, result)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        // Finalize always, even after total failure or shutdown.
        Self::set_phase(&self.phase, RunPhase::Finalized);
        let output_path = artifact::output_file(pdf_path, &document_id);
        artifact::write_merged(&output_path, &document_id, &cache.all_results())?;
        {
            let mut state = state.lock().await;
            state.save(&state_path)?;
        }

        let completed = results.iter().filter(|(_, r)| r.is_ok()).count() as u32;
        let failed = results
            .iter()
            .filter(|(_, r)| matches!(r, Err(e) if !e.is_shutdown()))
            .count() as u32;
        // The engine's own accounting includes calls whose responses were
        // rejected or retried; summing per-result tokens would miss that
        // spend. Engines that keep no cumulative count fall back to the
        // per-result sum.
        let mut tokens = engine.token_usage();
        if tokens.api_calls == 0 {
            for (_, result) in &results {
                if let Ok(r) = result {
                    tokens.add(&r.tokens);
                }
            }
        }
        let interrupted = self.shutdown.is_requested();

        if let Some(ref cb) = callback {
            cb.on_run_complete(total_pages, completed, failed);
        }

        info!(
            completed,
            failed,
            interrupted,
            elapsed_secs = start.elapsed().as_secs(),
            "run finished"
        );

        if !pending.is_empty() && completed == 0 && !interrupted {
            let first_error = results
                .iter()
                .find_map(|(_, r)| r.as_ref().err())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(OcrError::AllPagesFailed {
                total: pending.len(),
                retries: self.config.max_attempts,
                first_error,
            });
        }

        Ok(RunSummary {
            document_id,
            total_pages,
            requested: requested.len() as u32,
            skipped_cached,
            completed,
            failed,
            output_file: output_path,
            tokens,
            hybrid: engine.hybrid_stats(),
            duration: start.elapsed(),
            interrupted,
        })
    }
}

/// Render and recognise one page with the attempt-count retry loop.
///
/// Render failures are not retried: rasterisation is deterministic, so a
/// second attempt would fail the same way. Recognition failures retry per
/// the policy, with the backoff class derived from the error text.
async fn process_page(
    page: u32,
    rasterizer: &dyn Rasterizer,
    engine: &dyn OcrEngine,
    policy: RetryPolicy,
    dpi: u32,
    render_slots: &tokio::sync::Semaphore,
    shutdown: &ShutdownToken,
) -> Result<RecognitionResult, PageError> {
    if shutdown.is_requested() {
        return Err(PageError::Shutdown { page });
    }

    // The permit covers rendering only; recognition releases the slot so
    // the next page can rasterise while this one waits on the engine.
    let image = {
        let _permit = render_slots
            .acquire()
            .await
            .map_err(|_| PageError::RenderFailed {
                page,
                detail: "render pool closed".to_string(),
            })?;
        rasterizer.render(page, dpi).await?
    };

    let mut last_detail = String::new();
    let mut attempts_made = 0;
    for attempt in 1..=policy.max_attempts {
        if shutdown.is_requested() {
            return Err(PageError::Shutdown { page });
        }
        attempts_made = attempt;

        match engine.recognize(page, &image).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let detail = match e {
                    PageError::RecognitionFailed { detail, .. } => detail,
                    other => other.to_string(),
                };
                let class = classify_error(&detail);
                warn!(page, attempt, ?class, detail = %detail, "recognition attempt failed");
                last_detail = detail;

                if !policy.should_retry(class, attempt) {
                    break;
                }
                tokio::time::sleep(policy.backoff(class, attempt)).await;
            }
        }
    }

    Err(PageError::RecognitionFailed {
        page,
        attempts: attempts_made,
        detail: last_detail,
    })
}
