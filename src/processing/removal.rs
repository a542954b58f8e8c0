//! # Annotation Removal
//!
//! Clears masked pixels either by flat fill or by fast-marching inpainting
//! (Telea 2004): pixels are reconstructed in order of their distance from the
//! mask boundary, each from a weighted first-order extrapolation of already
//! known neighbours within `radius`.
//!
//! An empty mask is a no-op for both policies.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::{AnnotationMask, RasterImage};
use crate::error::{DiffError, DiffResult};
use crate::processing::mask::MaskProvider;

pub const DEFAULT_INPAINT_RADIUS: u32 = 7;
pub const WHITE: [u8; 3] = [255, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum RemovalPolicy {
    /// Paint masked pixels with a flat colour.
    Fill { color: [u8; 3] },
    /// Reconstruct masked pixels from their surroundings.
    Inpaint { radius: u32 },
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        RemovalPolicy::Fill { color: WHITE }
    }
}

/// Remove masked pixels from a copy of `image`.
pub fn remove(image: &RasterImage, mask: &AnnotationMask, policy: RemovalPolicy) -> DiffResult<RasterImage> {
    let mut out = image.clone();
    remove_in_place(&mut out, mask, policy)?;
    Ok(out)
}

/// Remove masked pixels, editing `image` directly.
#[instrument(skip(image, mask), fields(w = image.width(), h = image.height()))]
pub fn remove_in_place(image: &mut RasterImage, mask: &AnnotationMask, policy: RemovalPolicy) -> DiffResult<()> {
    if image.dimensions() != mask.dimensions() {
        return Err(DiffError::dimension_mismatch("remove_annotations", image.dimensions(), mask.dimensions()));
    }
    if mask.is_empty() {
        return Ok(());
    }
    match policy {
        RemovalPolicy::Fill { color } => fill(image, mask, color),
        RemovalPolicy::Inpaint { radius } => {
            if radius == 0 {
                return Err(DiffError::validation("inpaint_radius", "must be >= 1", "0"));
            }
            inpaint_telea(image, mask, radius)
        }
    }
    debug!(marked = mask.marked_count(), ?policy, "annotations removed");
    Ok(())
}

/// Detect -> remove, repeated up to `passes` times on the previous output.
///
/// Stops early once a pass detects nothing. Detection failures end the loop
/// and are returned next to the best image so far; every pass boundary is a
/// valid result.
pub fn remove_iteratively(
    image: &RasterImage,
    provider: &MaskProvider,
    policy: RemovalPolicy,
    passes: u32,
) -> DiffResult<(RasterImage, Option<DiffError>)> {
    let mut current = image.clone();
    for pass in 0..passes.max(1) {
        let mask = match provider.mask_for(&current) {
            Ok(mask) => mask,
            Err(err) => return Ok((current, Some(err))),
        };
        if mask.is_empty() {
            debug!(pass, "nothing left to remove");
            break;
        }
        remove_in_place(&mut current, &mask, policy)?;
    }
    Ok((current, None))
}

fn fill(image: &mut RasterImage, mask: &AnnotationMask, color: [u8; 3]) {
    match image {
        RasterImage::Gray(g) => {
            let v = gray_of(color);
            for (x, y, p) in g.enumerate_pixels_mut() {
                if mask.is_marked(x, y) {
                    p.0[0] = v;
                }
            }
        }
        RasterImage::Rgb(c) => {
            for (x, y, p) in c.enumerate_pixels_mut() {
                if mask.is_marked(x, y) {
                    p.0 = color;
                }
            }
        }
    }
}

fn gray_of(color: [u8; 3]) -> u8 {
    let [r, g, b] = color.map(f32::from);
    (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flag {
    Known,
    Band,
    Inside,
}

/// Min-heap entry ordered by arrival time.
#[derive(Clone, Copy)]
struct Front {
    t: f32,
    idx: usize,
}

impl PartialEq for Front {
    fn eq(&self, other: &Self) -> bool {
        self.t == other.t
    }
}
impl Eq for Front {}
impl PartialOrd for Front {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Front {
    fn cmp(&self, other: &Self) -> Ordering {
        other.t.total_cmp(&self.t).then_with(|| other.idx.cmp(&self.idx))
    }
}

const FAR: f32 = 1.0e6;

struct Field {
    w: usize,
    h: usize,
    channels: usize,
    data: Vec<f32>,
    flags: Vec<Flag>,
    t: Vec<f32>,
}

impl Field {
    fn neighbours(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let (x, y) = (idx % self.w, idx / self.w);
        let w = self.w;
        [
            (x > 0).then(|| idx - 1),
            (x + 1 < w).then(|| idx + 1),
            (y > 0).then(|| idx - w),
            (y + 1 < self.h).then(|| idx + w),
        ]
        .into_iter()
        .flatten()
    }

    fn at(&self, x: isize, y: isize) -> Option<usize> {
        (x >= 0 && y >= 0 && (x as usize) < self.w && (y as usize) < self.h).then(|| y as usize * self.w + x as usize)
    }

    /// One-sided eikonal update from a pair of orthogonal neighbours.
    fn solve(&self, a: Option<usize>, b: Option<usize>) -> f32 {
        let ta = a.filter(|&i| self.flags[i] != Flag::Inside).map(|i| self.t[i]);
        let tb = b.filter(|&i| self.flags[i] != Flag::Inside).map(|i| self.t[i]);
        match (ta, tb) {
            (Some(t1), Some(t2)) => {
                let r = 2.0 - (t1 - t2) * (t1 - t2);
                if r > 0.0 {
                    let s = r.sqrt();
                    let mut sol = (t1 + t2 - s) / 2.0;
                    if sol < t1 || sol < t2 {
                        sol += s;
                    }
                    sol
                } else {
                    1.0 + t1.min(t2)
                }
            }
            (Some(t1), None) => 1.0 + t1,
            (None, Some(t2)) => 1.0 + t2,
            (None, None) => FAR,
        }
    }

    fn arrival(&self, idx: usize) -> f32 {
        let (x, y) = ((idx % self.w) as isize, (idx / self.w) as isize);
        let a = self.solve(self.at(x - 1, y), self.at(x, y - 1));
        let b = self.solve(self.at(x + 1, y), self.at(x, y - 1));
        let c = self.solve(self.at(x - 1, y), self.at(x, y + 1));
        let d = self.solve(self.at(x + 1, y), self.at(x, y + 1));
        a.min(b).min(c).min(d)
    }

    fn known(&self, idx: Option<usize>) -> Option<usize> {
        idx.filter(|&i| self.flags[i] != Flag::Inside)
    }

    /// Central/one-sided difference of `f` along one axis over non-inside pixels.
    fn diff(&self, prev: Option<usize>, here: usize, next: Option<usize>, f: impl Fn(usize) -> f32) -> f32 {
        match (self.known(prev), self.known(next)) {
            (Some(p), Some(n)) => (f(n) - f(p)) / 2.0,
            (Some(p), None) => f(here) - f(p),
            (None, Some(n)) => f(n) - f(here),
            (None, None) => 0.0,
        }
    }

    fn inpaint_pixel(&mut self, idx: usize, radius: i32) {
        let (x, y) = ((idx % self.w) as isize, (idx / self.w) as isize);
        let t_here = self.t[idx];
        let grad_t = (
            self.diff(self.at(x - 1, y), idx, self.at(x + 1, y), |i| self.t[i]),
            self.diff(self.at(x, y - 1), idx, self.at(x, y + 1), |i| self.t[i]),
        );
        let mut acc = [0f32; 3];
        let mut weight_sum = 0f32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let Some(q) = self.at(x + dx as isize, y + dy as isize) else {
                    continue;
                };
                if self.flags[q] == Flag::Inside || q == idx {
                    continue;
                }
                let (qx, qy) = ((q % self.w) as isize, (q / self.w) as isize);
                let rx = (x - qx) as f32;
                let ry = (y - qy) as f32;
                let len2 = rx * rx + ry * ry;
                let dir = ((rx * grad_t.0 + ry * grad_t.1) / len2.sqrt()).abs().max(1e-6);
                let dst = 1.0 / (len2 * len2.sqrt());
                let lev = 1.0 / (1.0 + (self.t[q] - t_here).abs());
                let w = dir * dst * lev;
                for c in 0..self.channels {
                    let value = |i: usize| self.data[i * self.channels + c];
                    let gx = self.diff(self.at(qx - 1, qy), q, self.at(qx + 1, qy), value);
                    let gy = self.diff(self.at(qx, qy - 1), q, self.at(qx, qy + 1), value);
                    acc[c] += w * (value(q) + gx * rx + gy * ry);
                }
                weight_sum += w;
            }
        }
        if weight_sum > 0.0 {
            for c in 0..self.channels {
                self.data[idx * self.channels + c] = (acc[c] / weight_sum).clamp(0.0, 255.0);
            }
        }
    }
}

fn inpaint_telea(image: &mut RasterImage, mask: &AnnotationMask, radius: u32) {
    let (w, h) = image.dimensions();
    let (w, h) = (w as usize, h as usize);
    let channels = image.channels() as usize;
    let mut field = Field {
        w,
        h,
        channels,
        data: image.as_raw().iter().map(|&v| v as f32).collect(),
        flags: vec![Flag::Known; w * h],
        t: vec![0.0; w * h],
    };
    for idx in 0..w * h {
        if mask.is_marked((idx % w) as u32, (idx / w) as u32) {
            field.flags[idx] = Flag::Inside;
            field.t[idx] = FAR;
        }
    }

    // Initial front: known pixels touching the hole.
    let mut heap = BinaryHeap::new();
    for idx in 0..w * h {
        if field.flags[idx] == Flag::Known && field.neighbours(idx).any(|n| field.flags[n] == Flag::Inside) {
            field.flags[idx] = Flag::Band;
            heap.push(Front { t: 0.0, idx });
        }
    }

    let radius = radius as i32;
    while let Some(Front { idx, .. }) = heap.pop() {
        if field.flags[idx] == Flag::Known {
            continue;
        }
        field.flags[idx] = Flag::Known;
        let next: Vec<usize> = field.neighbours(idx).filter(|&n| field.flags[n] == Flag::Inside).collect();
        for n in next {
            let t = field.arrival(n);
            field.t[n] = t;
            field.inpaint_pixel(n, radius);
            field.flags[n] = Flag::Band;
            heap.push(Front { t, idx: n });
        }
    }

    let bytes: Vec<u8> = field.data.iter().map(|v| v.round() as u8).collect();
    match image {
        RasterImage::Gray(g) => g.copy_from_slice(&bytes),
        RasterImage::Rgb(c) => c.copy_from_slice(&bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Polygon;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn with_text() -> RasterImage {
        let mut img = GrayImage::from_pixel(40, 40, Luma([255]));
        for y in 15..20 {
            for x in 10..25 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        RasterImage::Gray(img)
    }

    fn text_mask() -> AnnotationMask {
        AnnotationMask::from_polygons(40, 40, &[Polygon::rect(9.0, 14.0, 17.0, 7.0)]).unwrap()
    }

    #[test]
    fn fill_whitens_masked_pixels() {
        let out = remove(&with_text(), &text_mask(), RemovalPolicy::default()).unwrap();
        assert!(out.to_gray().pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn fill_is_idempotent() {
        let policy = RemovalPolicy::Fill { color: WHITE };
        let once = remove(&with_text(), &text_mask(), policy).unwrap();
        let twice = remove(&once, &text_mask(), policy).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_mask_is_noop_for_both_policies() {
        let img = with_text();
        let empty = AnnotationMask::empty(40, 40);
        for policy in [RemovalPolicy::default(), RemovalPolicy::Inpaint { radius: 7 }] {
            assert_eq!(remove(&img, &empty, policy).unwrap(), img);
        }
    }

    #[test]
    fn inpaint_reconstructs_from_background() {
        let out = remove(&with_text(), &text_mask(), RemovalPolicy::Inpaint { radius: 5 }).unwrap();
        let g = out.to_gray();
        assert!(g.get_pixel(17, 17).0[0] > 200);
        assert_eq!(g.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn inpaint_continues_a_crossing_line() {
        // Vertical line through a masked box should survive as a dark stroke.
        let mut img = RgbImage::from_pixel(30, 30, Rgb([255, 255, 255]));
        for y in 0..30 {
            img.put_pixel(15, y, Rgb([0, 0, 0]));
        }
        let mask = AnnotationMask::from_polygons(30, 30, &[Polygon::rect(10.0, 12.0, 10.0, 4.0)]).unwrap();
        let out = remove(&RasterImage::Rgb(img), &mask, RemovalPolicy::Inpaint { radius: 3 }).unwrap();
        let g = out.to_gray();
        assert!(g.get_pixel(15, 14).0[0] < g.get_pixel(11, 14).0[0]);
    }

    #[test]
    fn mask_size_must_match() {
        let err = remove(&with_text(), &AnnotationMask::empty(10, 10), RemovalPolicy::default()).unwrap_err();
        assert_eq!(err.category(), "dimension_mismatch");
    }

    #[test]
    fn gray_fill_uses_luminance() {
        assert_eq!(gray_of(WHITE), 255);
        assert_eq!(gray_of([0, 0, 0]), 0);
    }
}
