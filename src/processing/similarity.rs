//! # Similarity Scoring
//!
//! Structural similarity (SSIM) between two grayscale drawings, a categorical
//! status, the share of pixels that differ significantly, and an optional
//! false-colour heatmap of local difference.
//!
//! Local statistics use a 7×7 uniform window with reflected borders; the
//! global score is the mean of the local map away from the border band.

use image::{GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use archidiff_scale::presets::{Size, SizeConvention, common_size};

use crate::core::RasterImage;
use crate::error::{DiffError, DiffResult};

const WINDOW: usize = 7;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Local difference (percent) above which a pixel counts as changed.
pub const SIGNIFICANT_DIFFERENCE: f64 = 20.0;
pub const HEATMAP_WEIGHT: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityStatus {
    Identical,
    VerySimilar,
    Similar,
    Different,
}

impl SimilarityStatus {
    pub fn from_score(score: f64) -> Self {
        if score > 0.98 {
            SimilarityStatus::Identical
        } else if score > 0.90 {
            SimilarityStatus::VerySimilar
        } else if score > 0.70 {
            SimilarityStatus::Similar
        } else {
            SimilarityStatus::Different
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Global SSIM, `0.0..=1.0`.
    pub score: f64,
    pub status: SimilarityStatus,
    /// Share of pixels whose local difference exceeds the threshold, `0..=100`.
    pub diff_area_percent: f64,
}

impl SimilarityResult {
    pub fn is_similar(&self) -> bool {
        self.score > 0.90
    }
}

/// Per-pixel SSIM values, row-major.
#[derive(Debug, Clone)]
pub struct SsimMap {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f64>,
}

impl SsimMap {
    /// Mean over pixels at least half a window from every edge; the whole
    /// map when the image is smaller than one window.
    pub fn mean(&self) -> f64 {
        let pad = WINDOW / 2;
        let (w, h) = (self.width as usize, self.height as usize);
        let (mut sum, mut n) = (0.0, 0usize);
        if w > 2 * pad && h > 2 * pad {
            for y in pad..h - pad {
                for x in pad..w - pad {
                    sum += self.values[y * w + x];
                    n += 1;
                }
            }
        } else {
            sum = self.values.iter().sum();
            n = self.values.len();
        }
        if n == 0 { 1.0 } else { sum / n as f64 }
    }

    /// `(1 - S) * 100`, clamped to `0..=100`.
    pub fn difference_percent(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().map(|s| ((1.0 - s) * 100.0).clamp(0.0, 100.0))
    }

    pub fn significant_share(&self, threshold: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let count = self.difference_percent().filter(|&d| d > threshold).count();
        count as f64 * 100.0 / self.values.len() as f64
    }
}

/// SSIM map of two equally sized grayscale images.
pub fn ssim(a: &GrayImage, b: &GrayImage) -> DiffResult<SsimMap> {
    if a.dimensions() != b.dimensions() {
        return Err(DiffError::dimension_mismatch("ssim", a.dimensions(), b.dimensions()));
    }
    let (w, h) = (a.width() as usize, a.height() as usize);
    if w == 0 || h == 0 {
        return Err(DiffError::validation("image", "must not be empty", format!("{w}x{h}")));
    }
    let pad = WINDOW / 2;
    let (pw, ph) = (w + 2 * pad, h + 2 * pad);
    let pa = reflect_pad(a.as_raw(), w, h, pad);
    let pb = reflect_pad(b.as_raw(), w, h, pad);

    let ia = Integral::build(pw, ph, |i| pa[i]);
    let ib = Integral::build(pw, ph, |i| pb[i]);
    let iaa = Integral::build(pw, ph, |i| pa[i] * pa[i]);
    let ibb = Integral::build(pw, ph, |i| pb[i] * pb[i]);
    let iab = Integral::build(pw, ph, |i| pa[i] * pb[i]);

    let n = (WINDOW * WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let mut values = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let mx = ia.window(x, y) / n;
            let my = ib.window(x, y) / n;
            let vx = cov_norm * (iaa.window(x, y) / n - mx * mx);
            let vy = cov_norm * (ibb.window(x, y) / n - my * my);
            let vxy = cov_norm * (iab.window(x, y) / n - mx * my);
            let num = (2.0 * mx * my + C1) * (2.0 * vxy + C2);
            let den = (mx * mx + my * my + C1) * (vx + vy + C2);
            values.push(num / den);
        }
    }
    Ok(SsimMap {
        width: w as u32,
        height: h as u32,
        values,
    })
}

/// Score two drawings, shrinking both to the smaller of their sizes first.
#[instrument(skip_all, fields(a = %a.size(), b = %b.size()))]
pub fn score_similarity(a: &RasterImage, b: &RasterImage) -> DiffResult<SimilarityResult> {
    score_with_threshold(a, b, SIGNIFICANT_DIFFERENCE)
}

pub fn score_with_threshold(a: &RasterImage, b: &RasterImage, threshold: f64) -> DiffResult<SimilarityResult> {
    let (ga, gb, _) = common_grays(a, b)?;
    let map = ssim(&ga, &gb)?;
    let score = map.mean().clamp(0.0, 1.0);
    let result = SimilarityResult {
        score,
        status: SimilarityStatus::from_score(score),
        diff_area_percent: map.significant_share(threshold),
    };
    debug!(score, status = ?result.status, diff = result.diff_area_percent, "similarity scored");
    Ok(result)
}

/// False-colour difference map (`weight` heat, `1 - weight` of `a`).
pub fn heatmap(a: &RasterImage, b: &RasterImage, weight: f32) -> DiffResult<RgbImage> {
    let (ga, gb, target) = common_grays(a, b)?;
    let map = ssim(&ga, &gb)?;
    let base = a.resized_to(target)?.to_rgb();
    let weight = weight.clamp(0.0, 1.0);
    let mut out = RgbImage::new(map.width, map.height);
    for ((d, src), px) in map.difference_percent().zip(base.pixels()).zip(out.pixels_mut()) {
        let heat = jet((d / 100.0 * 255.0).round() as u8);
        let mut rgb = [0u8; 3];
        for c in 0..3 {
            rgb[c] = (heat[c] as f32 * weight + src.0[c] as f32 * (1.0 - weight)).round() as u8;
        }
        *px = Rgb(rgb);
    }
    Ok(out)
}

fn common_grays(a: &RasterImage, b: &RasterImage) -> DiffResult<(GrayImage, GrayImage, Size)> {
    let target = common_size(a.size(), b.size(), SizeConvention::Smaller);
    Ok((a.resized_to(target)?.to_gray(), b.resized_to(target)?.to_gray(), target))
}

/// Cold (blue) to hot (red) colour ramp.
pub fn jet(v: u8) -> [u8; 3] {
    let t = v as f32 / 255.0;
    let channel = |offset: f32| ((1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    [channel(3.0), channel(2.0), channel(1.0)]
}

fn reflect_pad(src: &[u8], w: usize, h: usize, pad: usize) -> Vec<f64> {
    let reflect = |i: isize, n: usize| -> usize {
        let n = n as isize;
        let mut i = i;
        // Symmetric reflection, repeated for images smaller than the pad.
        loop {
            if i < 0 {
                i = -i - 1;
            } else if i >= n {
                i = 2 * n - i - 1;
            } else {
                return i as usize;
            }
        }
    };
    let (pw, ph) = (w + 2 * pad, h + 2 * pad);
    let mut out = Vec::with_capacity(pw * ph);
    for y in 0..ph {
        let sy = reflect(y as isize - pad as isize, h);
        for x in 0..pw {
            let sx = reflect(x as isize - pad as isize, w);
            out.push(src[sy * w + sx] as f64);
        }
    }
    out
}

/// Summed-area table over a padded plane; `window(x, y)` sums the 7×7 block
/// whose top-left padded corner is `(x, y)`.
struct Integral {
    stride: usize,
    sums: Vec<f64>,
}

impl Integral {
    fn build(w: usize, h: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = w + 1;
        let mut sums = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0.0;
            for x in 0..w {
                row += value(y * w + x);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    fn window(&self, x: usize, y: usize) -> f64 {
        let s = self.stride;
        let (x1, y1) = (x + WINDOW, y + WINDOW);
        self.sums[y1 * s + x1] - self.sums[y * s + x1] - self.sums[y1 * s + x] + self.sums[y * s + x]
    }
}
