//! PDF rasterisation: render every page of an uploaded PDF to an image.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and
//! not async-aware. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so Tokio worker threads keep serving other requests.
//!
//! ## Why cap pixels, not DPI?
//!
//! Scans arrive at arbitrary resolutions. `max_rendered_pixels` caps the
//! output size regardless of the physical page size, keeping memory bounded
//! and images inside the sweet spot for vision models.

use crate::error::ExaminerError;
use crate::pipeline::input::PdfSource;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Turns PDF bytes into page images in physical page order.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render every page of `pdf`, one image per page.
    async fn render(&self, pdf: &PdfSource) -> Result<Vec<DynamicImage>, ExaminerError>;
}

/// Renderer backed by pdfium.
///
/// The library is looked up in `PDFIUM_LIB_PATH` (a library file or the
/// directory holding it) and otherwise in the system library path.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_rendered_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(max_rendered_pixels: u32) -> Self {
        Self {
            max_rendered_pixels: max_rendered_pixels.max(100),
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(&self, pdf: &PdfSource) -> Result<Vec<DynamicImage>, ExaminerError> {
        let source = pdf.clone();
        let max_pixels = self.max_rendered_pixels;

        tokio::task::spawn_blocking(move || render_blocking(&source, max_pixels))
            .await
            .map_err(|e| ExaminerError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind to the pdfium shared library.
pub fn bind_pdfium() -> Result<Pdfium, ExaminerError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = Path::new(&p);
            if path.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            } else {
                Pdfium::bind_to_library(path)
            }
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExaminerError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn render_blocking(pdf: &PdfSource, max_pixels: u32) -> Result<Vec<DynamicImage>, ExaminerError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(&pdf.bytes, None)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                ExaminerError::PasswordRequired {
                    name: pdf.file_name.clone(),
                }
            } else {
                ExaminerError::CorruptPdf {
                    name: pdf.file_name.clone(),
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(ExaminerError::EmptyDocument {
            name: pdf.file_name.clone(),
        });
    }
    info!("{}: {} pages", pdf.file_name, total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| ExaminerError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExaminerError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered {} page {} → {}x{} px",
            pdf.file_name,
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_floors_pixel_cap() {
        let r = PdfiumRenderer::new(5);
        assert_eq!(r.max_rendered_pixels, 100);
    }
}
