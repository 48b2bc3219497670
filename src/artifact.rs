//! Output artifact: the assembled `{stem}_unicode.md` document.
//!
//! The artifact is both the deliverable and a secondary store: on every
//! finalize the existing file is parsed back, merged with this run's
//! results (new text wins per page), and rewritten in full with pages in
//! ascending order. A run that processed pages 11-20 therefore extends the
//! file produced by the run that did 1-10 instead of clobbering it.

use crate::error::OcrError;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Derive the artifact path: `{parent}/{stem}_unicode.md`.
pub fn output_file(pdf_path: &Path, document_id: &str) -> PathBuf {
    let parent = pdf_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{document_id}_unicode.md"))
}

static PAGE_SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)## Page (\d+)\n\n(.*?)(?:\n---|\z)").expect("page section regex")
});

/// Parse page sections out of an existing artifact.
///
/// Returns an empty map when the file does not exist or matches nothing —
/// an unreadable artifact is treated as absent, never as an error, because
/// finalize must always be able to write.
pub fn parse_existing(path: &Path) -> BTreeMap<u32, String> {
    let mut pages = BTreeMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return pages;
    };
    for cap in PAGE_SECTION_RE.captures_iter(&content) {
        let Ok(page) = cap[1].parse::<u32>() else {
            continue;
        };
        pages.insert(page, cap[2].trim().to_string());
    }
    debug!(path = %path.display(), pages = pages.len(), "parsed existing artifact");
    pages
}

/// Merge this run's results over any existing artifact and write it
/// atomically (tmp + rename), pages in ascending order.
pub fn write_merged(
    path: &Path,
    document_id: &str,
    results: &BTreeMap<u32, String>,
) -> Result<(), OcrError> {
    let mut merged = parse_existing(path);
    for (page, text) in results {
        merged.insert(*page, text.clone());
    }

    let write_failed = |source: std::io::Error| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut body = String::new();
    body.push_str(&format!("# {document_id} - OCR Output\n"));
    body.push_str(&format!(
        "Generated: {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    body.push_str(&format!("Pages processed: {}\n\n", merged.len()));
    body.push_str("---\n\n");
    for (page, text) in &merged {
        body.push_str(&format!("## Page {page}\n\n"));
        body.push_str(text);
        body.push_str("\n\n---\n\n");
    }

    let tmp = path.with_extension("md.tmp");
    {
        let mut file = std::fs::File::create(&tmp).map_err(write_failed)?;
        file.write_all(body.as_bytes()).map_err(write_failed)?;
        file.sync_all().map_err(write_failed)?;
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        write_failed(e)
    })?;

    debug!(path = %path.display(), pages = merged.len(), "artifact written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(pairs: &[(u32, &str)]) -> BTreeMap<u32, String> {
        pairs.iter().map(|(p, t)| (*p, t.to_string())).collect()
    }

    #[test]
    fn output_path_derivation() {
        let path = output_file(Path::new("/scans/tantra_sara.pdf"), "tantra_sara");
        assert_eq!(path, Path::new("/scans/tantra_sara_unicode.md"));
    }

    #[test]
    fn written_artifact_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc_unicode.md");
        let input = results(&[(1, "ॐ नमः शिवाय"), (3, "द्वितीय पृष्ठ का पाठ")]);

        write_merged(&path, "doc", &input).unwrap();
        let parsed = parse_existing(&path);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&1], "ॐ नमः शिवाय");
        assert_eq!(parsed[&3], "द्वितीय पृष्ठ का पाठ");
    }

    #[test]
    fn merge_preserves_pages_from_earlier_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc_unicode.md");

        write_merged(&path, "doc", &results(&[(1, "पहला"), (2, "दूसरा")])).unwrap();
        write_merged(&path, "doc", &results(&[(3, "तीसरा")])).unwrap();

        let parsed = parse_existing(&path);
        assert_eq!(parsed.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(parsed[&1], "पहला");
    }

    #[test]
    fn merge_lets_new_text_win_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc_unicode.md");

        write_merged(&path, "doc", &results(&[(5, "पुराना पाठ")])).unwrap();
        write_merged(&path, "doc", &results(&[(5, "नया पाठ")])).unwrap();

        assert_eq!(parse_existing(&path)[&5], "नया पाठ");
    }

    #[test]
    fn pages_are_written_in_ascending_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc_unicode.md");

        write_merged(&path, "doc", &results(&[(9, "नौ"), (2, "दो"), (5, "पाँच")])).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let p2 = content.find("## Page 2").unwrap();
        let p5 = content.find("## Page 5").unwrap();
        let p9 = content.find("## Page 9").unwrap();
        assert!(p2 < p5 && p5 < p9);
        assert!(content.starts_with("# doc - OCR Output\n"));
    }

    #[test]
    fn missing_artifact_parses_as_empty() {
        assert!(parse_existing(Path::new("/nonexistent/none.md")).is_empty());
    }
}
