//! Resolution enhancement before comparison.
//!
//! The default upscaler is plain cubic interpolation. Model-backed
//! implementations plug in through [`Upscaler`] and are run under the
//! pipeline's upscale timeout.

use archidiff_scale::cpu::ResizeKind;
use archidiff_scale::presets::scale_by;

use crate::core::RasterImage;

pub trait Upscaler: Send + Sync {
    fn name(&self) -> &str;

    /// Enlarge `image` by an integer `factor`; `1` returns a copy.
    fn upscale(&self, image: &RasterImage, factor: u32) -> anyhow::Result<RasterImage>;
}

/// Catmull-Rom resampling.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpolatingUpscaler;

impl Upscaler for InterpolatingUpscaler {
    fn name(&self) -> &str {
        "cubic"
    }

    fn upscale(&self, image: &RasterImage, factor: u32) -> anyhow::Result<RasterImage> {
        anyhow::ensure!(factor >= 1, "upscale factor must be >= 1, got {factor}");
        if factor == 1 {
            return Ok(image.clone());
        }
        let target = scale_by(image.size(), factor as f64, factor as f64);
        Ok(image.resized(target, ResizeKind::Cubic)?)
    }
}
