//! Crash-safe per-page result cache.
//!
//! One page = one file = one atomic rename. A reader can therefore never
//! observe a partially written entry: either the rename happened and the
//! full text is visible, or it did not and the page is simply absent.
//! Entries outlive a single run, which is what makes resume cheap — the
//! cache, not the progress snapshot, is the source of truth for which
//! pages are already done.
//!
//! Layout, keyed by the source document's stable stem so distinct
//! documents never collide:
//!
//! ```text
//! .ocr_cache_{document_id}/
//!     page_0001.txt          # committed text, atomic
//!     page_0001.meta.json    # sidecar metadata, best effort
//!     page_0002.txt
//!     ...
//! ```

use crate::error::PageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sidecar metadata for a cached page. Loss of this record is non-fatal;
/// only the `.txt` entry participates in crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub page: u32,
    pub engine: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

/// File-based cache of committed page texts.
pub struct PageCache {
    cache_dir: PathBuf,
}

impl PageCache {
    /// Open (creating if needed) the cache directory for a document.
    pub fn open(pdf_path: &Path, document_id: &str) -> std::io::Result<Self> {
        let dir = pdf_path.parent().unwrap_or_else(|| Path::new("."));
        let cache_dir = dir.join(format!(".ocr_cache_{document_id}"));
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// The directory backing this cache.
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn page_path(&self, page: u32) -> PathBuf {
        self.cache_dir.join(format!("page_{page:04}.txt"))
    }

    fn meta_path(&self, page: u32) -> PathBuf {
        self.cache_dir.join(format!("page_{page:04}.meta.json"))
    }

    /// Commit a page's text durably.
    ///
    /// Writes to `page_NNNN.txt.tmp`, then renames into place. The sidecar
    /// metadata write afterwards is best effort. On any text-write failure
    /// the temporary file is removed and the error propagates — a page
    /// whose result cannot be recorded must not be reported completed.
    pub fn put(
        &self,
        page: u32,
        text: &str,
        engine: &str,
        confidence: f32,
    ) -> Result<(), PageError> {
        let target = self.page_path(page);
        let tmp = self.cache_dir.join(format!("page_{page:04}.txt.tmp"));

        let commit = std::fs::write(&tmp, text).and_then(|()| std::fs::rename(&tmp, &target));
        if let Err(e) = commit {
            let _ = std::fs::remove_file(&tmp);
            return Err(PageError::CacheWrite {
                page,
                detail: e.to_string(),
            });
        }

        let meta = CacheEntryMeta {
            page,
            engine: engine.to_string(),
            confidence,
            timestamp: Utc::now(),
        };
        match serde_json::to_string_pretty(&meta) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.meta_path(page), json) {
                    debug!("Sidecar metadata write failed for page {page}: {e}");
                }
            }
            Err(e) => debug!("Sidecar metadata serialise failed for page {page}: {e}"),
        }

        debug!("Cached page {page}: {} chars", text.len());
        Ok(())
    }

    /// Committed text for a page, or `None` if absent.
    pub fn get(&self, page: u32) -> Option<String> {
        let path = self.page_path(page);
        match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read cache entry {}: {e}", path.display());
                None
            }
        }
    }

    /// Sidecar metadata for a page, if the best-effort record survived.
    pub fn meta(&self, page: u32) -> Option<CacheEntryMeta> {
        let data = std::fs::read_to_string(self.meta_path(page)).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Sorted list of committed page numbers.
    ///
    /// Only `page_NNNN.txt` entries count; stray `.tmp` files from a crash
    /// are invisible here, which is what makes an interrupted `put` safe.
    pub fn pages(&self) -> Vec<u32> {
        let mut cached = Vec::new();
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(_) => return cached,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_prefix("page_").and_then(|s| s.strip_suffix(".txt")) {
                if let Ok(page) = stem.parse::<u32>() {
                    cached.push(page);
                }
            }
        }
        cached.sort_unstable();
        cached
    }

    /// All committed results as a page → text map.
    pub fn all_results(&self) -> BTreeMap<u32, String> {
        self.pages()
            .into_iter()
            .filter_map(|p| self.get(p).map(|text| (p, text)))
            .collect()
    }

    /// Requested pages with no committed entry, preserving input order.
    pub fn pending_pages(&self, requested: &[u32]) -> Vec<u32> {
        let cached: std::collections::BTreeSet<u32> = self.pages().into_iter().collect();
        requested
            .iter()
            .copied()
            .filter(|p| !cached.contains(p))
            .collect()
    }

    /// Number of committed pages.
    pub fn len(&self) -> usize {
        self.pages().len()
    }

    /// True when no page has been committed.
    pub fn is_empty(&self) -> bool {
        self.pages().is_empty()
    }

    /// Delete every entry and the directory itself.
    ///
    /// Only call once the caller no longer needs crash recovery for this
    /// run (i.e. the output artifact has been finalised).
    pub fn purge(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.cache_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to purge cache {}: {e}", self.cache_dir.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> PageCache {
        let pdf = dir.path().join("scroll.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").expect("write pdf");
        PageCache::open(&pdf, "scroll").expect("open cache")
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);

        cache.put(3, "ॐ नमः शिवाय", "tesseract", 0.92).expect("put");
        assert_eq!(cache.get(3).as_deref(), Some("ॐ नमः शिवाय"));
        assert_eq!(cache.get(4), None);

        let meta = cache.meta(3).expect("meta");
        assert_eq!(meta.engine, "tesseract");
        assert!((meta.confidence - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn pages_are_sorted_and_ignore_tmp_files() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);

        cache.put(10, "b", "t", 1.0).expect("put");
        cache.put(2, "a", "t", 1.0).expect("put");
        // Simulate a crash between temp write and rename.
        std::fs::write(cache.dir().join("page_0007.txt.tmp"), "partial").expect("tmp");

        assert_eq!(cache.pages(), vec![2, 10]);
        assert_eq!(cache.get(7), None);
    }

    #[test]
    fn pending_pages_preserves_order() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        cache.put(2, "x", "t", 1.0).expect("put");

        assert_eq!(cache.pending_pages(&[5, 2, 1]), vec![5, 1]);
    }

    #[test]
    fn all_results_maps_pages_to_text() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        cache.put(1, "one", "t", 1.0).expect("put");
        cache.put(2, "two", "t", 1.0).expect("put");

        let all = cache.all_results();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&1], "one");
        assert_eq!(all[&2], "two");
    }

    #[test]
    fn purge_removes_everything() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        cache.put(1, "x", "t", 1.0).expect("put");
        cache.purge();
        assert!(!cache.dir().exists());
    }

    #[test]
    fn distinct_documents_use_distinct_directories() {
        let dir = TempDir::new().expect("tempdir");
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        std::fs::write(&a, b"%PDF").expect("write");
        std::fs::write(&b, b"%PDF").expect("write");

        let ca = PageCache::open(&a, "a").expect("open");
        let cb = PageCache::open(&b, "b").expect("open");
        ca.put(1, "from a", "t", 1.0).expect("put");
        assert!(cb.get(1).is_none());
    }
}
