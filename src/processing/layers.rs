//! Two-layer editing of drawings before a manual overlay.
//!
//! A [`LayerStack`] holds a base and a top drawing as RGBA layers. Each layer
//! can be cropped, warped through a [`GeometricTransform`], tinted so paper
//! turns transparent, and reset to what was loaded. [`LayerStack::flatten`]
//! blends the top layer over the base on white paper.

use image::{Rgba, RgbaImage, imageops};
use imageproc::geometric_transformations::{Interpolation, warp_into};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{GeometricTransform, RasterImage};
use crate::error::{DiffError, DiffResult};
use crate::processing::composite::tint_layer;
use crate::processing::normalize::center_of;

/// Fill for pixels a warp leaves uncovered: transparent paper.
pub const CLEAR: Rgba<u8> = Rgba([255, 255, 255, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSlot {
    Base,
    Top,
}

#[derive(Debug, Clone)]
struct Layer {
    original: RgbaImage,
    current: RgbaImage,
}

impl Layer {
    fn new(image: &RasterImage) -> Self {
        let rgba = image.to_dynamic().to_rgba8();
        Self {
            original: rgba.clone(),
            current: rgba,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerStack {
    base: Layer,
    top: Layer,
}

impl LayerStack {
    pub fn new(base: &RasterImage, top: &RasterImage) -> Self {
        Self {
            base: Layer::new(base),
            top: Layer::new(top),
        }
    }

    pub fn layer(&self, slot: LayerSlot) -> &RgbaImage {
        &self.slot(slot).current
    }

    fn slot(&self, slot: LayerSlot) -> &Layer {
        match slot {
            LayerSlot::Base => &self.base,
            LayerSlot::Top => &self.top,
        }
    }

    fn slot_mut(&mut self, slot: LayerSlot) -> &mut Layer {
        match slot {
            LayerSlot::Base => &mut self.base,
            LayerSlot::Top => &mut self.top,
        }
    }

    /// Keep the `width × height` window at `(x, y)`, clipped to the layer.
    pub fn crop(&mut self, slot: LayerSlot, x: u32, y: u32, width: u32, height: u32) -> DiffResult<()> {
        let layer = self.slot_mut(slot);
        let (w, h) = layer.current.dimensions();
        let (cw, ch) = (width.min(w.saturating_sub(x)), height.min(h.saturating_sub(y)));
        if cw == 0 || ch == 0 {
            return Err(DiffError::validation(
                "crop",
                "window must overlap the layer",
                format!("{width}x{height}+{x}+{y} on {w}x{h}"),
            ));
        }
        layer.current = imageops::crop_imm(&layer.current, x, y, cw, ch).to_image();
        debug!(?slot, width = cw, height = ch, "layer cropped");
        Ok(())
    }

    /// Warp a layer in place, keeping its size. Uncovered pixels become [`CLEAR`].
    pub fn transform(&mut self, slot: LayerSlot, transform: &GeometricTransform) -> DiffResult<()> {
        transform.validate()?;
        if transform.is_identity() {
            return Ok(());
        }
        let layer = self.slot_mut(slot);
        let projection = transform.projection(center_of(layer.current.dimensions()))?;
        let mut out = RgbaImage::new(layer.current.width(), layer.current.height());
        warp_into(&layer.current, &projection, Interpolation::Bilinear, CLEAR, &mut out);
        layer.current = out;
        debug!(?slot, ?transform, "layer transformed");
        Ok(())
    }

    /// Recolour ink and make paper transparent.
    pub fn tint(&mut self, slot: LayerSlot, color: [u8; 3]) {
        let layer = self.slot_mut(slot);
        let on_paper = flatten_onto_paper(&layer.current);
        layer.current = tint_layer(&RasterImage::Rgb(on_paper), color);
    }

    /// Undo every edit of one layer.
    pub fn reset(&mut self, slot: LayerSlot) {
        let layer = self.slot_mut(slot);
        layer.current = layer.original.clone();
    }

    /// Top over base over white, sized to the larger of the two.
    pub fn flatten(&self) -> RgbaImage {
        let (b, t) = (&self.base.current, &self.top.current);
        let mut canvas = RgbaImage::from_pixel(b.width().max(t.width()), b.height().max(t.height()), Rgba([255; 4]));
        imageops::overlay(&mut canvas, b, 0, 0);
        imageops::overlay(&mut canvas, t, 0, 0);
        canvas
    }
}

fn flatten_onto_paper(layer: &RgbaImage) -> image::RgbImage {
    let mut paper = RgbaImage::from_pixel(layer.width(), layer.height(), Rgba([255; 4]));
    imageops::overlay(&mut paper, layer, 0, 0);
    image::DynamicImage::ImageRgba8(paper).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn drawing(w: u32, h: u32, ink: &[(u32, u32)]) -> RasterImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        for &(x, y) in ink {
            img.put_pixel(x, y, Luma([0]));
        }
        RasterImage::Gray(img)
    }

    #[test]
    fn crop_clips_to_layer_and_reset_restores() {
        let mut stack = LayerStack::new(&drawing(40, 30, &[(12, 8)]), &drawing(40, 30, &[]));
        stack.crop(LayerSlot::Base, 10, 5, 100, 10).unwrap();
        assert_eq!(stack.layer(LayerSlot::Base).dimensions(), (30, 10));
        assert_eq!(stack.layer(LayerSlot::Base).get_pixel(2, 3).0, [0, 0, 0, 255]);
        assert!(stack.crop(LayerSlot::Base, 30, 0, 5, 5).is_err());

        stack.reset(LayerSlot::Base);
        assert_eq!(stack.layer(LayerSlot::Base).dimensions(), (40, 30));
    }

    #[test]
    fn transform_moves_ink_and_clears_border() {
        let mut stack = LayerStack::new(&drawing(20, 20, &[]), &drawing(20, 20, &[(5, 5)]));
        let shift = GeometricTransform {
            translate_x: 4.0,
            ..GeometricTransform::identity()
        };
        stack.transform(LayerSlot::Top, &shift).unwrap();
        let top = stack.layer(LayerSlot::Top);
        assert_eq!(top.get_pixel(9, 5).0, [0, 0, 0, 255]);
        assert_eq!(top.get_pixel(1, 10).0, CLEAR.0);
        assert_eq!(stack.layer(LayerSlot::Base).get_pixel(1, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn tinted_top_shows_base_through_paper() {
        let mut stack = LayerStack::new(&drawing(20, 20, &[(3, 3)]), &drawing(20, 20, &[(10, 10)]));
        stack.tint(LayerSlot::Top, [0, 255, 0]);
        assert_eq!(stack.layer(LayerSlot::Top).get_pixel(3, 3).0[3], 0);

        let flat = stack.flatten();
        assert_eq!(flat.get_pixel(3, 3).0, [0, 0, 0, 255], "base ink visible through top paper");
        assert_eq!(flat.get_pixel(10, 10).0, [0, 255, 0, 255]);
        assert_eq!(flat.get_pixel(15, 2).0, [255, 255, 255, 255]);
    }

    #[test]
    fn flatten_covers_the_larger_layer() {
        let stack = LayerStack::new(&drawing(30, 10, &[]), &drawing(10, 25, &[]));
        assert_eq!(stack.flatten().dimensions(), (30, 25));
    }
}
