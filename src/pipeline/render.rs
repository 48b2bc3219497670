//! PDF rasterisation: render pages to `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool so Tokio workers never stall during CPU-heavy rendering.
//!
//! ## Why a trait?
//!
//! [`Rasterizer`] is the seam between document handling and recognition.
//! The pipeline only needs "page N as an image"; tests substitute a stub
//! that synthesises images, so the whole dispatch/retry/resume machinery is
//! testable without a native pdfium library on the test host.

use crate::error::{OcrError, PageError};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Renders document pages on demand.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Total number of pages in the document.
    async fn page_count(&self) -> Result<u32, OcrError>;

    /// Render a single page (1-indexed) at the given DPI.
    async fn render(&self, page: u32, dpi: u32) -> Result<DynamicImage, PageError>;
}

/// pdfium-backed rasteriser. Reopens the document per call; pdfium keeps no
/// useful cross-call state and the open cost is dwarfed by rendering at
/// 300 DPI.
pub struct PdfiumRasterizer {
    path: PathBuf,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, OcrError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.to_lowercase().contains("password") {
            if password.is_some() {
                OcrError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                OcrError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            OcrError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn page_count(&self) -> Result<u32, OcrError> {
        let path = self.path.clone();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = Pdfium::default();
            let document = open_document(&pdfium, &path, password.as_deref())?;
            Ok(document.pages().len() as u32)
        })
        .await
        .map_err(|e| OcrError::Internal(format!("page-count task panicked: {e}")))?
    }

    async fn render(&self, page: u32, dpi: u32) -> Result<DynamicImage, PageError> {
        let path = self.path.clone();
        let password = self.password.clone();
        let render_failed = |detail: String| PageError::RenderFailed { page, detail };

        tokio::task::spawn_blocking(move || {
            let pdfium = Pdfium::default();
            let document = open_document(&pdfium, &path, password.as_deref())
                .map_err(|e| PageError::RenderFailed {
                    page,
                    detail: e.to_string(),
                })?;

            let pages = document.pages();
            if page == 0 || page > pages.len() as u32 {
                return Err(PageError::RenderFailed {
                    page,
                    detail: format!("page out of range (document has {})", pages.len()),
                });
            }

            let pdf_page = pages.get((page - 1) as u16).map_err(|e| PageError::RenderFailed {
                page,
                detail: format!("{e:?}"),
            })?;

            // Scale a letter-width page to the requested DPI, capped so an
            // oversized scan cannot exhaust memory.
            let target_width = ((dpi as i32) * 85 / 10).min(4000);
            let render_config = PdfRenderConfig::new()
                .set_target_width(target_width)
                .set_maximum_height(target_width * 2);

            let bitmap = pdf_page
                .render_with_config(&render_config)
                .map_err(|e| PageError::RenderFailed {
                    page,
                    detail: format!("{e:?}"),
                })?;

            let image = bitmap.as_image();
            debug!(page, width = image.width(), height = image.height(), "rendered page");
            Ok(image)
        })
        .await
        .map_err(|e| render_failed(format!("render task panicked: {e}")))?
    }
}
