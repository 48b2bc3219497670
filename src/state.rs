//! Resumable progress tracking, persisted as a JSON snapshot.
//!
//! The snapshot is saved synchronously after every page outcome, so a crash
//! loses at most the page that was in flight — never an outcome that was
//! already recorded. The tracker is a fast index; the page cache
//! ([`crate::cache::PageCache`]) remains the source of truth and the
//! tracker can be rebuilt from it on resume.

use crate::error::OcrError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted per-document progress: which pages completed, which failed.
///
/// Invariant: `completed_pages ∩ failed_pages = ∅`. Marking a page completed
/// removes it from the failed set; a completed page is never re-marked
/// failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    /// Stable identity of the source document (its file stem).
    pub document_id: String,
    pub total_pages: u32,
    pub completed_pages: BTreeSet<u32>,
    pub failed_pages: BTreeSet<u32>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ProgressState {
    /// Fresh state for a document.
    pub fn new(document_id: impl Into<String>, total_pages: u32) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.into(),
            total_pages,
            completed_pages: BTreeSet::new(),
            failed_pages: BTreeSet::new(),
            started_at: now,
            last_updated: now,
        }
    }

    /// Load a snapshot, returning `None` when the file is missing or
    /// unparseable (a stale or corrupt snapshot just means a cold start).
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Ignoring unreadable progress snapshot {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist the snapshot via write-to-temp + atomic rename, so a crash
    /// mid-save cannot truncate a previously valid snapshot.
    pub fn save(&mut self, path: &Path) -> Result<(), OcrError> {
        self.last_updated = Utc::now();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| OcrError::Internal(format!("progress serialise: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        let write_err = |source: std::io::Error| OcrError::ProgressWriteFailed {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;
        debug!(
            "Progress saved: {} completed, {} failed",
            self.completed_pages.len(),
            self.failed_pages.len()
        );
        Ok(())
    }

    /// Mark a page completed. Idempotent; removes the page from the failed
    /// set if a previous run recorded it there.
    pub fn mark_completed(&mut self, page: u32) {
        self.completed_pages.insert(page);
        self.failed_pages.remove(&page);
    }

    /// Mark a page failed. Idempotent and additive only: a page already
    /// completed stays completed.
    pub fn mark_failed(&mut self, page: u32) {
        if !self.completed_pages.contains(&page) {
            self.failed_pages.insert(page);
        }
    }

    /// Requested pages not yet completed, preserving the input order.
    pub fn pending_pages(&self, requested: &[u32]) -> Vec<u32> {
        requested
            .iter()
            .copied()
            .filter(|p| !self.completed_pages.contains(p))
            .collect()
    }
}

/// Progress snapshot path derived from the source document's stable name,
/// placed alongside it so a resumed run finds it automatically.
pub fn progress_file(pdf_path: &Path, document_id: &str) -> PathBuf {
    let dir = pdf_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".ocr_progress_{document_id}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mark_completed_is_idempotent_and_clears_failed() {
        let mut state = ProgressState::new("doc", 10);
        state.mark_failed(3);
        assert!(state.failed_pages.contains(&3));

        state.mark_completed(3);
        state.mark_completed(3);
        assert_eq!(state.completed_pages.len(), 1);
        assert!(!state.failed_pages.contains(&3));
    }

    #[test]
    fn completed_page_never_regresses_to_failed() {
        let mut state = ProgressState::new("doc", 10);
        state.mark_completed(5);
        state.mark_failed(5);
        assert!(state.completed_pages.contains(&5));
        assert!(!state.failed_pages.contains(&5));
    }

    #[test]
    fn pending_preserves_request_order() {
        let mut state = ProgressState::new("doc", 10);
        state.mark_completed(2);
        state.mark_completed(8);
        assert_eq!(state.pending_pages(&[8, 1, 2, 5]), vec![1, 5]);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(".ocr_progress_doc.json");

        let mut state = ProgressState::new("doc", 4);
        state.mark_completed(1);
        state.mark_failed(2);
        state.save(&path).expect("save");

        let loaded = ProgressState::load(&path).expect("load");
        assert_eq!(loaded.document_id, "doc");
        assert_eq!(loaded.total_pages, 4);
        assert!(loaded.completed_pages.contains(&1));
        assert!(loaded.failed_pages.contains(&2));
    }

    #[test]
    fn load_missing_or_corrupt_returns_none() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("nope.json");
        assert!(ProgressState::load(&missing).is_none());

        let corrupt = dir.path().join("bad.json");
        std::fs::write(&corrupt, "{not json").expect("write");
        assert!(ProgressState::load(&corrupt).is_none());
    }

    #[test]
    fn progress_file_is_derived_from_document_id() {
        let p = progress_file(Path::new("/books/tantra.pdf"), "tantra");
        assert_eq!(p, PathBuf::from("/books/.ocr_progress_tantra.json"));
    }
}
