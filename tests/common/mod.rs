//! Shared fixtures for the archidiff integration tests
//!
//! Synthetic drawings are white sheets with black strokes, which is all the
//! pipeline ever sees after rasterization.

#![allow(dead_code)]

/// Synthetic drawing builders
pub mod drawings {
    use archidiff::RasterImage;
    use image::{GrayImage, Luma};

    pub const INK: Luma<u8> = Luma([0]);
    pub const PAPER: Luma<u8> = Luma([255]);

    /// Blank white sheet
    pub fn sheet(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, PAPER)
    }

    pub fn hline(img: &mut GrayImage, y: u32, x0: u32, x1: u32) {
        for x in x0..x1.min(img.width()) {
            img.put_pixel(x, y, INK);
        }
    }

    pub fn vline(img: &mut GrayImage, x: u32, y0: u32, y1: u32) {
        for y in y0..y1.min(img.height()) {
            img.put_pixel(x, y, INK);
        }
    }

    pub fn fill_rect(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32) {
        for yy in y..(y + h).min(img.height()) {
            for xx in x..(x + w).min(img.width()) {
                img.put_pixel(xx, yy, INK);
            }
        }
    }

    /// Four walls with an interior partition, scaled to the sheet
    pub fn floor_plan(w: u32, h: u32) -> GrayImage {
        let mut img = sheet(w, h);
        let (l, r, t, b) = (w / 10, w - w / 10, h / 10, h - h / 10);
        hline(&mut img, t, l, r + 1);
        hline(&mut img, b, l, r + 1);
        vline(&mut img, l, t, b + 1);
        vline(&mut img, r, t, b + 1);
        vline(&mut img, w / 2, t, b - h / 5);
        img
    }

    /// Deterministic blocky texture with plenty of corners
    pub fn texture(w: u32, h: u32, seed: u32) -> GrayImage {
        let mut img = sheet(w, h);
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        for _ in 0..(w * h / 400).max(8) {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let x = (state >> 8) % w.saturating_sub(12).max(1);
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let y = (state >> 8) % h.saturating_sub(12).max(1);
            fill_rect(&mut img, x, y, 4 + (state >> 4) % 8, 4 + (state >> 12) % 8);
        }
        img
    }

    pub fn raster(img: GrayImage) -> RasterImage {
        RasterImage::Gray(img)
    }
}

/// Pixel assertions over rendered overlays
pub mod assertions {
    use image::RgbImage;

    /// Count pixels satisfying `pred`
    pub fn count(img: &RgbImage, pred: impl Fn([u8; 3]) -> bool) -> usize {
        img.pixels().filter(|p| pred(p.0)).count()
    }

    /// Pixels where only the given channel carries signal
    pub fn only_channel(img: &RgbImage, channel: usize) -> usize {
        count(img, |px| {
            px[channel] > 128 && (0..3).filter(|&c| c != channel).all(|c| px[c] < 64)
        })
    }

    pub fn assert_background_black(img: &RgbImage, x: u32, y: u32) {
        assert_eq!(img.get_pixel(x, y).0, [0, 0, 0], "expected empty background at ({x}, {y})");
    }
}
