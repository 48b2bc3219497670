//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! pdfium requires a file-system path, so URL inputs are downloaded to a
//! `TempDir` whose lifetime is tied to [`ResolvedInput`] — cleanup happens
//! on drop even if the run aborts. The PDF magic bytes (`%PDF`) are checked
//! before returning so callers get a meaningful error rather than a pdfium
//! crash on page one.

use crate::error::OcrError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input — either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until the run completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// Stable identifier for this document, used to derive the cache
    /// directory, progress file, and output artifact names. All run state
    /// for the same file lands in the same place across invocations, which
    /// is what makes resume work.
    pub fn document_id(&self) -> String {
        document_id(self.path())
    }
}

/// Derive the document identifier from a path: the file stem, unchanged.
pub fn document_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, OcrError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, OcrError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(OcrError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(OcrError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(OcrError::FileNotFound { path });
        }
    }

    debug!("resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, OcrError> {
    info!("downloading PDF from {url}");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| OcrError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            OcrError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            OcrError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(OcrError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);

    let temp_dir = TempDir::new().map_err(|e| OcrError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(|e| OcrError::DownloadFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(OcrError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| OcrError::Internal(format!("failed to write temp file: {e}")))?;

    info!("downloaded to {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn document_id_is_the_file_stem() {
        assert_eq!(document_id(Path::new("/scans/tantra_sara.pdf")), "tantra_sara");
        assert_eq!(document_id(Path::new("book.PDF")), "book");
        assert_eq!(document_id(Path::new("/")), "document");
    }

    #[test]
    fn filename_extraction_from_urls() {
        assert_eq!(extract_filename("https://x.org/a/scripture.pdf"), "scripture.pdf");
        assert_eq!(extract_filename("https://x.org/download"), "downloaded.pdf");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = resolve_local("/nonexistent/file.pdf").unwrap_err();
        assert!(matches!(err, OcrError::FileNotFound { .. }));
    }

    #[test]
    fn non_pdf_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"PK\x03\x04 not a pdf").unwrap();
        let err = resolve_local(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, OcrError::NotAPdf { .. }));
    }
}
