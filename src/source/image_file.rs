//! Raster inputs (PNG, JPEG, BMP, TIFF, ...).

use std::path::Path;

use tracing::debug;

use crate::core::RasterImage;
use crate::error::{DiffError, DiffResult};

/// Decodes single-page raster files. They are already pixels, so the
/// resolution multiplier does not apply.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileRasterizer;

impl super::Rasterizer for ImageFileRasterizer {
    fn rasterize(&self, document: &Path, page_index: u32, _scale_factor: f32) -> DiffResult<RasterImage> {
        if page_index != 0 {
            return Err(DiffError::load_failed(
                document.display().to_string(),
                format!("raster images have a single page, requested page {}", page_index),
            ));
        }
        let raster = RasterImage::open(document)?;
        debug!(path = %document.display(), width = raster.width(), height = raster.height(), "raster decoded");
        Ok(raster)
    }
}
