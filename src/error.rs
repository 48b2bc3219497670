//! Error types for the mantra-ocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] — **Fatal**: the run cannot proceed at all (bad input
//!   file, no usable engine, output file unwritable). Returned as
//!   `Err(OcrError)` from the top-level run functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (render glitch,
//!   retries exhausted, shutdown) but all other pages are fine. Recorded in
//!   the progress tracker as a failed page so the run continues and the
//!   page stays individually re-runnable.
//!
//! One deliberate exception to "page errors never abort the success path":
//! a [`PageError::CacheWrite`] means a recognised page could not be durably
//! recorded, so that page must not be reported as completed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mantra-ocr library.
///
/// Page-level failures use [`PageError`] and are recorded in the progress
/// tracker rather than propagated here.
#[derive(Debug, Error)]
pub enum OcrError {
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

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    /// Invalid page range specification (e.g. "7-3" or "0").
    #[error("Invalid page selection '{spec}': {detail}")]
    InvalidPageSpec { spec: String, detail: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The selected engine could not be initialised (missing binary,
    /// missing API key, failed auth check).
    #[error("OCR engine '{engine}' is not available.\n{hint}")]
    EngineUnavailable { engine: String, hint: String },

    /// Every requested page failed after all retries; output would be empty.
    #[error("All {total} pages failed after {retries} retries each.\nFirst error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not persist the progress snapshot.
    #[error("Failed to save progress snapshot '{path}': {source}")]
    ProgressWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Recorded against the page in the progress tracker; the run continues
/// unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed; no recognition attempt was made.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: u32, detail: String },

    /// Recognition failed after all retry attempts.
    #[error("Page {page}: recognition failed after {attempts} attempts: {detail}")]
    RecognitionFailed {
        page: u32,
        attempts: u32,
        detail: String,
    },

    /// A recognised page could not be written to the durable cache.
    /// The page must be recorded as failed, not completed.
    #[error("Page {page}: cache write failed: {detail}")]
    CacheWrite { page: u32, detail: String },

    /// Shutdown was requested before this page was dispatched.
    /// Not retried and not counted as a failure in the tracker.
    #[error("Page {page}: shutdown requested")]
    Shutdown { page: u32 },
}

impl PageError {
    /// Page number this error applies to.
    pub fn page(&self) -> u32 {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::RecognitionFailed { page, .. }
            | PageError::CacheWrite { page, .. }
            | PageError::Shutdown { page } => *page,
        }
    }

    /// True for the shutdown outcome, which is a cancellation, not a failure.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PageError::Shutdown { .. })
    }
}
