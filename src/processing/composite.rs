//! # Channel Compositor
//!
//! Turns two aligned drawings into one colour image. Each drawing becomes a
//! structural signal (ink bright, paper dark), optionally thickened, and is
//! written into its own colour channel.
//!
//! | Blend          | Overlap renders as                                    |
//! |----------------|-------------------------------------------------------|
//! | `Additive`     | mixed hue (green + red = yellow)                      |
//! | `Intersection` | exactly the configured "both" colour, channels zeroed |
//!
//! The comparison drawing is the upper layer; `opacity` scales its signal.

use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::contrast::otsu_level;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::core::morphology::dilate_rect;
use crate::core::{ComparisonPair, RasterImage};
use crate::error::{DiffError, DiffResult};

pub const MIN_THICKNESS: u32 = 1;
pub const MAX_THICKNESS: u32 = 10;
pub const PRESENCE_THRESHOLD: u8 = 30;
pub const BOTH_COLOR: [u8; 3] = [0, 0, 255];
/// Per-channel level above which a pixel counts as paper when tinting.
pub const PAPER_LEVEL: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BlendMode {
    Additive,
    /// Pixels above `threshold` in both signals render as `color`.
    Intersection { threshold: u8, color: [u8; 3] },
}

impl BlendMode {
    pub fn intersection() -> Self {
        BlendMode::Intersection {
            threshold: PRESENCE_THRESHOLD,
            color: BOTH_COLOR,
        }
    }
}

/// How a drawing is reduced to a single-channel signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureSignal {
    /// `255 - gray`.
    #[default]
    Inverted,
    /// Otsu binarization thinned to one-pixel centre lines.
    Skeleton,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeConfig {
    pub reference_channel: Channel,
    pub comparison_channel: Channel,
    /// Applied to the comparison (upper) layer, `0.0..=1.0`.
    pub opacity: f32,
    /// Square dilation kernel, `1..=10`; `1` leaves strokes unchanged.
    pub thickness: u32,
    pub blend: BlendMode,
    pub signal: StructureSignal,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            reference_channel: Channel::Green,
            comparison_channel: Channel::Red,
            opacity: 1.0,
            thickness: MIN_THICKNESS,
            blend: BlendMode::Additive,
            signal: StructureSignal::Inverted,
        }
    }
}

impl CompositeConfig {
    pub fn validate(&self) -> DiffResult<()> {
        if self.reference_channel == self.comparison_channel {
            return Err(DiffError::validation(
                "comparison_channel",
                "must differ from reference_channel",
                format!("{:?}", self.comparison_channel),
            ));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(DiffError::validation("opacity", "must be within 0.0..=1.0", self.opacity.to_string()));
        }
        if !(MIN_THICKNESS..=MAX_THICKNESS).contains(&self.thickness) {
            return Err(DiffError::validation("thickness", "must be within 1..=10", self.thickness.to_string()));
        }
        Ok(())
    }

    /// Same picture with the roles of the two drawings exchanged.
    pub fn swapped(&self) -> Self {
        Self {
            reference_channel: self.comparison_channel,
            comparison_channel: self.reference_channel,
            ..*self
        }
    }
}

/// Compose a normalized pair.
pub fn compose(pair: &ComparisonPair, config: &CompositeConfig) -> DiffResult<RgbImage> {
    compose_images(&pair.reference, &pair.comparison, config)
}

/// Compose two rasters that already share a grid.
#[instrument(skip(reference, comparison), fields(w = reference.width(), h = reference.height()))]
pub fn compose_images(reference: &RasterImage, comparison: &RasterImage, config: &CompositeConfig) -> DiffResult<RgbImage> {
    if reference.dimensions() != comparison.dimensions() {
        return Err(DiffError::dimension_mismatch("compose", reference.dimensions(), comparison.dimensions()));
    }
    config.validate()?;
    let lower = structural_signal(&reference.to_gray(), config.signal, config.thickness);
    let upper = structural_signal(&comparison.to_gray(), config.signal, config.thickness);
    compose_signals(&lower, &upper, config)
}

/// Compose two prepared structural signals.
pub fn compose_signals(lower: &GrayImage, upper: &GrayImage, config: &CompositeConfig) -> DiffResult<RgbImage> {
    if lower.dimensions() != upper.dimensions() {
        return Err(DiffError::dimension_mismatch("compose", lower.dimensions(), upper.dimensions()));
    }
    let (lc, uc) = (config.reference_channel.index(), config.comparison_channel.index());
    let opacity = config.opacity.clamp(0.0, 1.0);
    let mut out = RgbImage::new(lower.width(), lower.height());
    for ((l, u), px) in lower.pixels().zip(upper.pixels()).zip(out.pixels_mut()) {
        let (l, u) = (l.0[0], u.0[0]);
        if let BlendMode::Intersection { threshold, color } = config.blend {
            if l > threshold && u > threshold {
                *px = Rgb(color);
                continue;
            }
        }
        let mut rgb = [0u8; 3];
        rgb[lc] = rgb[lc].saturating_add(l);
        rgb[uc] = rgb[uc].saturating_add((u as f32 * opacity) as u8);
        *px = Rgb(rgb);
    }
    Ok(out)
}

/// Reduce a grayscale drawing to a signal where ink is bright.
pub fn structural_signal(gray: &GrayImage, signal: StructureSignal, thickness: u32) -> GrayImage {
    let base = match signal {
        StructureSignal::Inverted => invert(gray),
        StructureSignal::Skeleton => skeletonize(gray),
    };
    dilate_rect(&base, thickness.clamp(MIN_THICKNESS, MAX_THICKNESS))
}

pub fn invert(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    out.pixels_mut().for_each(|p| p.0[0] = 255 - p.0[0]);
    out
}

/// Otsu binarization followed by Zhang–Suen thinning. Ink = 255.
pub fn skeletonize(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    let (w, h) = gray.dimensions();
    let mut cells: Vec<bool> = gray.pixels().map(|p| p.0[0] <= level && level < 255).collect();
    zhang_suen(&mut cells, w as usize, h as usize);
    GrayImage::from_fn(w, h, |x, y| Luma([if cells[(y * w + x) as usize] { 255 } else { 0 }]))
}

fn zhang_suen(cells: &mut [bool], w: usize, h: usize) {
    if w < 3 || h < 3 {
        return;
    }
    let mut removals = Vec::new();
    loop {
        let mut changed = false;
        for step in 0..2 {
            removals.clear();
            for y in 1..h - 1 {
                for x in 1..w - 1 {
                    if !cells[y * w + x] {
                        continue;
                    }
                    let at = |dx: isize, dy: isize| {
                        cells[(y as isize + dy) as usize * w + (x as isize + dx) as usize] as u8
                    };
                    // P2..P9 clockwise from north.
                    let n = [at(0, -1), at(1, -1), at(1, 0), at(1, 1), at(0, 1), at(-1, 1), at(-1, 0), at(-1, -1)];
                    let b: u8 = n.iter().sum();
                    let a = (0..8).filter(|&i| n[i] == 0 && n[(i + 1) % 8] == 1).count();
                    let (p2, p4, p6, p8) = (n[0], n[2], n[4], n[6]);
                    let cond = if step == 0 {
                        p2 * p4 * p6 == 0 && p4 * p6 * p8 == 0
                    } else {
                        p2 * p4 * p8 == 0 && p2 * p6 * p8 == 0
                    };
                    if (2..=6).contains(&b) && a == 1 && cond {
                        removals.push(y * w + x);
                    }
                }
            }
            for &i in &removals {
                cells[i] = false;
            }
            changed |= !removals.is_empty();
        }
        if !changed {
            break;
        }
    }
}

/// RGBA layer of a drawing: paper transparent, ink in `color` with alpha
/// following ink darkness.
pub fn tint_layer(image: &RasterImage, color: [u8; 3]) -> RgbaImage {
    let rgb = image.to_rgb();
    RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y).0;
        if p.iter().all(|&c| c > PAPER_LEVEL) {
            return Rgba([0, 0, 0, 0]);
        }
        let mean = p.iter().map(|&c| c as u32).sum::<u32>() / 3;
        Rgba([color[0], color[1], color[2], (255 - mean) as u8])
    })
}
