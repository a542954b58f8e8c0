//! # Document Rasterization
//!
//! Turns an input document into a [`RasterImage`]. Raster formats decode
//! directly through the `image` crate; PDF pages are rendered by the poppler
//! `pdftoppm` tool in a scratch directory.
//!
//! Decode failures always surface as `LoadFailed` naming the input so the
//! pipeline can stop before normalization.

use std::path::Path;

use crate::core::RasterImage;
use crate::error::DiffResult;

pub mod image_file;
pub mod pdf;

pub use image_file::ImageFileRasterizer;
pub use pdf::PdfRasterizer;

/// Renders one page of a document at a resolution multiplier.
pub trait Rasterizer: Send + Sync {
    /// `scale_factor` is relative to 72 DPI for vector documents.
    fn rasterize(&self, document: &Path, page_index: u32, scale_factor: f32) -> DiffResult<RasterImage>;
}

/// Dispatch on file extension: `.pdf` goes to [`PdfRasterizer`], everything
/// else to [`ImageFileRasterizer`].
#[derive(Debug, Default, Clone)]
pub struct AutoRasterizer {
    pub pdf: PdfRasterizer,
    pub image: ImageFileRasterizer,
}

impl AutoRasterizer {
    pub fn is_pdf(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
    }
}

impl Rasterizer for AutoRasterizer {
    fn rasterize(&self, document: &Path, page_index: u32, scale_factor: f32) -> DiffResult<RasterImage> {
        if Self::is_pdf(document) {
            self.pdf.rasterize(document, page_index, scale_factor)
        } else {
            self.image.rasterize(document, page_index, scale_factor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_detection_is_case_insensitive() {
        assert!(AutoRasterizer::is_pdf(Path::new("plans/A-101.PDF")));
        assert!(AutoRasterizer::is_pdf(Path::new("a.pdf")));
        assert!(!AutoRasterizer::is_pdf(Path::new("a.png")));
        assert!(!AutoRasterizer::is_pdf(Path::new("pdf")));
    }
}
