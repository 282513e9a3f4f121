//! PDF rasterisation: render one page to PNG via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which keeps
//! thread-local state and blocks for the whole render. Every call runs on
//! tokio's blocking pool so the async workers never stall on CPU-heavy work.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image-size sweet spot for vision models.
//!
//! The whole page is always rendered. The safe area is applied later, to
//! the OCR regions, so changing it never forces a re-render.

use crate::adapters::PageImage;
use crate::config::PipelineConfig;
use crate::error::{PageError, PipelineError};
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Produces page images for the coordinator.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn page_count(&self) -> usize;

    /// Render page `page_index` (0-based) to PNG.
    async fn render_page(&self, page_index: usize) -> Result<PageImage, PageError>;
}

/// Bind to the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` names a directory holding the platform library;
/// otherwise the system library search path is used.
pub fn bind_pdfium() -> Result<Pdfium, PipelineError> {
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        let lib = Pdfium::pdfium_platform_library_name_at_path(dir.as_str());
        debug!("Binding pdfium from {}", lib.display());
        let bindings = Pdfium::bind_to_library(&lib).map_err(|e| {
            PipelineError::PdfiumBindingFailed(format!("{}: {:?}", lib.display(), e))
        })?;
        return Ok(Pdfium::new(bindings));
    }
    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// pdfium-backed renderer for one PDF file.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    path: PathBuf,
    password: Option<String>,
    max_pixels: u32,
    page_count: usize,
}

impl PdfiumRenderer {
    /// Open `path` once to validate it and count its pages.
    pub async fn open(path: &Path, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let owned = path.to_path_buf();
        let password = config.password.clone();
        let page_count = tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = load(&pdfium, &owned, password.as_deref())?;
            Ok::<_, PipelineError>(document.pages().len() as usize)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Open task panicked: {}", e)))??;

        info!("PDF loaded: {} ({} pages)", path.display(), page_count);
        Ok(Self {
            path: path.to_path_buf(),
            password: config.password.clone(),
            max_pixels: config.max_rendered_pixels,
            page_count,
        })
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn render_page(&self, page_index: usize) -> Result<PageImage, PageError> {
        let path = self.path.clone();
        let password = self.password.clone();
        let max_pixels = self.max_pixels;
        tokio::task::spawn_blocking(move || {
            render_blocking(&path, password.as_deref(), max_pixels, page_index)
        })
        .await
        .map_err(|e| PageError::Render {
            page: page_index,
            detail: format!("render task panicked: {}", e),
        })?
    }
}

fn load<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, PipelineError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                PipelineError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                PipelineError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            PipelineError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn render_blocking(
    path: &Path,
    password: Option<&str>,
    max_pixels: u32,
    page_index: usize,
) -> Result<PageImage, PageError> {
    let fail = |detail: String| PageError::Render {
        page: page_index,
        detail,
    };

    let pdfium = bind_pdfium().map_err(|e| fail(e.to_string()))?;
    let document = load(&pdfium, path, password).map_err(|e| fail(e.to_string()))?;
    let pages = document.pages();
    let total = pages.len() as usize;
    if page_index >= total {
        return Err(fail(format!("page out of range (document has {total} pages)")));
    }

    let page = pages
        .get(page_index as u16)
        .map_err(|e| fail(format!("{:?}", e)))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let image = page
        .render_with_config(&render_config)
        .map_err(|e| fail(format!("{:?}", e)))?
        .as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_index + 1,
        image.width(),
        image.height()
    );

    let png = encode_png(&image).map_err(|e| fail(format!("PNG encoding failed: {}", e)))?;
    Ok(PageImage {
        page_index,
        width: image.width(),
        height: image.height(),
        png,
    })
}
