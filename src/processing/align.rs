//! # Automatic Alignment
//!
//! Feature-based registration of the comparison drawing onto the reference:
//!
//! ```text
//!   reference ──┐                                   ┌── matches (≤ max_matches)
//!               ├─ FAST corners ─ orient ─ BRIEF ───┤
//!   comparison ─┘   (per pyramid level)             └── cross-checked Hamming
//!                                                             │
//!                                              RANSAC homography (≈5 px)
//! ```
//!
//! The comparison is first resampled to the reference size, so the estimated
//! homography only has to absorb the residual misregistration. Fewer than
//! `min_matches` good correspondences (or inliers) fails with
//! [`DiffError::AlignmentInsufficient`]; callers fall back to the baseline
//! resize.

use std::f64::consts::SQRT_2;

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use nalgebra::{Matrix3, SMatrix, SVector, SymmetricEigen, Vector3};
use tracing::{debug, instrument};

use archidiff_scale::presets::Size;
use archidiff_scale::cpu::ResizeKind;

use crate::core::{ComparisonPair, Homography, RasterImage, Registration};
use crate::error::{DiffError, DiffResult};
use crate::processing::normalize::{Border, baseline, warp_raster};

const PATCH_RADIUS: i32 = 15;
const PATTERN_EXTENT: i32 = 13;
/// Keypoints closer than this to an edge are dropped so rotated samples stay inside.
const EDGE_MARGIN: u32 = 20;
const DESCRIPTOR_BITS: usize = 256;
const PYRAMID_SCALE: f32 = 1.5;

#[derive(Debug, Clone)]
pub struct AlignParams {
    /// Strongest matches kept for estimation.
    pub max_matches: usize,
    /// Minimum matches, and minimum RANSAC inliers.
    pub min_matches: usize,
    /// RANSAC reprojection threshold in pixels.
    pub ransac_threshold: f64,
    pub fast_threshold: u8,
    /// Keypoint budget per drawing, split across pyramid levels.
    pub max_keypoints: usize,
    /// Matches with a larger descriptor distance are discarded.
    pub max_hamming: u32,
    pub iterations: usize,
    pub pyramid_levels: u32,
    /// Seeds the sampling pattern and the RANSAC sampler.
    pub seed: u64,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            max_matches: 50,
            min_matches: 10,
            ransac_threshold: 5.0,
            fast_threshold: 20,
            max_keypoints: 500,
            max_hamming: 64,
            iterations: 2000,
            pyramid_levels: 3,
            seed: 0x5eed_a11c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentOutcome {
    /// Maps comparison pixels to reference pixels.
    pub homography: Homography,
    pub inliers: usize,
    pub matches: usize,
}

/// Baseline-resize `comparison`, then register it onto `reference`.
#[instrument(skip_all, fields(reference = %reference.size(), comparison = %comparison.size()))]
pub fn auto_align(
    reference: RasterImage,
    comparison: &RasterImage,
    params: &AlignParams,
    aspect_tolerance: f64,
) -> DiffResult<ComparisonPair> {
    let resized = baseline(reference, comparison, aspect_tolerance)?;
    let outcome = estimate(&resized.reference.to_gray(), &resized.comparison.to_gray(), params)?;
    let projection = outcome.homography.projection()?;
    let warped = warp_raster(&resized.comparison, &projection, resized.dimensions(), Border::Paper);
    ComparisonPair::new(
        resized.reference,
        warped,
        Registration::Homography {
            homography: outcome.homography,
            inliers: outcome.inliers,
        },
        resized.aspect_warning,
    )
}

/// Estimate the homography taking `comparison` onto `reference`.
pub fn estimate(reference: &GrayImage, comparison: &GrayImage, params: &AlignParams) -> DiffResult<AlignmentOutcome> {
    let pattern = sampling_pattern(params.seed);
    let ref_features = features(reference, params, &pattern)?;
    let cmp_features = features(comparison, params, &pattern)?;
    let matches = cross_checked_matches(&cmp_features, &ref_features, params);
    debug!(
        reference_keypoints = ref_features.len(),
        comparison_keypoints = cmp_features.len(),
        matches = matches.len(),
        "feature matching done"
    );
    if matches.len() < params.min_matches {
        return Err(DiffError::alignment_insufficient(matches.len(), params.min_matches));
    }

    let src: Vec<(f64, f64)> = matches.iter().map(|m| cmp_features[m.query].position()).collect();
    let dst: Vec<(f64, f64)> = matches.iter().map(|m| ref_features[m.train].position()).collect();
    let (matrix, inliers) = ransac(&src, &dst, params)
        .ok_or_else(|| DiffError::alignment_insufficient(0, params.min_matches))?;
    if inliers < params.min_matches {
        return Err(DiffError::alignment_insufficient(inliers, params.min_matches)
            .with_context("too few RANSAC inliers"));
    }
    if !is_plausible(&matrix) {
        return Err(DiffError::alignment_insufficient(inliers, params.min_matches)
            .with_context("degenerate homography"));
    }
    debug!(inliers, "homography estimated");
    Ok(AlignmentOutcome {
        homography: Homography { matrix },
        inliers,
        matches: matches.len(),
    })
}

#[derive(Debug, Clone)]
struct Feature {
    x: f32,
    y: f32,
    descriptor: [u64; DESCRIPTOR_BITS / 64],
}

impl Feature {
    fn position(&self) -> (f64, f64) {
        (self.x as f64, self.y as f64)
    }

    fn distance(&self, other: &Feature) -> u32 {
        self.descriptor
            .iter()
            .zip(other.descriptor.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

type Pattern = Vec<((f32, f32), (f32, f32))>;

fn sampling_pattern(seed: u64) -> Pattern {
    let mut rng = Lcg::new(seed);
    let span = (2 * PATTERN_EXTENT + 1) as u32;
    let mut coord = || (rng.below(span) as i32 - PATTERN_EXTENT) as f32;
    (0..DESCRIPTOR_BITS)
        .map(|_| ((coord(), coord()), (coord(), coord())))
        .collect()
}

fn features(image: &GrayImage, params: &AlignParams, pattern: &Pattern) -> DiffResult<Vec<Feature>> {
    let levels = params.pyramid_levels.max(1);
    let weights: Vec<f32> = (0..levels).map(|l| PYRAMID_SCALE.powi(-2 * l as i32)).collect();
    let total: f32 = weights.iter().sum();

    let mut out = Vec::new();
    let mut level_image = image.clone();
    for (level, weight) in weights.iter().enumerate() {
        if level > 0 {
            let scale = PYRAMID_SCALE.powi(level as i32);
            let w = (image.width() as f32 / scale).round() as u32;
            let h = (image.height() as f32 / scale).round() as u32;
            if w <= 2 * EDGE_MARGIN || h <= 2 * EDGE_MARGIN {
                break;
            }
            level_image = RasterImage::Gray(image.clone())
                .resized(Size::new(w, h), ResizeKind::Area)?
                .to_gray();
        }
        let budget = ((params.max_keypoints as f32) * weight / total).ceil() as usize;
        let scale = PYRAMID_SCALE.powi(level as i32);
        out.extend(level_features(&level_image, params.fast_threshold, budget, pattern, scale));
    }
    Ok(out)
}

fn level_features(image: &GrayImage, threshold: u8, budget: usize, pattern: &Pattern, scale: f32) -> Vec<Feature> {
    let (w, h) = image.dimensions();
    if w <= 2 * EDGE_MARGIN || h <= 2 * EDGE_MARGIN {
        return Vec::new();
    }
    let corners = corners_fast9(image, threshold);

    // 3x3 non-maximum suppression on the score map.
    let mut scores = vec![0f32; (w * h) as usize];
    for c in &corners {
        scores[(c.y * w + c.x) as usize] = c.score;
    }
    let mut kept: Vec<_> = corners
        .into_iter()
        .filter(|c| {
            c.x >= EDGE_MARGIN && c.y >= EDGE_MARGIN && c.x < w - EDGE_MARGIN && c.y < h - EDGE_MARGIN
        })
        .filter(|c| {
            (c.y - 1..=c.y + 1).all(|ny| (c.x - 1..=c.x + 1).all(|nx| scores[(ny * w + nx) as usize] <= c.score))
        })
        .collect();
    kept.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| (a.y, a.x).cmp(&(b.y, b.x))));
    kept.truncate(budget);

    let smooth = gaussian_blur_f32(image, 2.0);
    kept.iter()
        .map(|c| {
            let angle = orientation(image, c.x as i32, c.y as i32);
            Feature {
                x: c.x as f32 * scale,
                y: c.y as f32 * scale,
                descriptor: describe(&smooth, c.x as f32, c.y as f32, angle, pattern),
            }
        })
        .collect()
}

/// Intensity-centroid angle over a disc around the keypoint.
fn orientation(image: &GrayImage, cx: i32, cy: i32) -> f32 {
    let (mut m01, mut m10) = (0f64, 0f64);
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > PATCH_RADIUS * PATCH_RADIUS {
                continue;
            }
            let v = image.get_pixel((cx + dx) as u32, (cy + dy) as u32).0[0] as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }
    m01.atan2(m10) as f32
}

fn describe(smooth: &GrayImage, x: f32, y: f32, angle: f32, pattern: &Pattern) -> [u64; DESCRIPTOR_BITS / 64] {
    let (s, c) = angle.sin_cos();
    let sample = |(px, py): (f32, f32)| {
        let sx = (x + c * px - s * py).round() as u32;
        let sy = (y + s * px + c * py).round() as u32;
        smooth.get_pixel(sx, sy).0[0]
    };
    let mut bits = [0u64; DESCRIPTOR_BITS / 64];
    for (i, &(p, q)) in pattern.iter().enumerate() {
        if sample(p) < sample(q) {
            bits[i / 64] |= 1 << (i % 64);
        }
    }
    bits
}

#[derive(Debug, Clone, Copy)]
struct Match {
    query: usize,
    train: usize,
    distance: u32,
}

fn best_match(feature: &Feature, candidates: &[Feature]) -> Option<(usize, u32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, feature.distance(c)))
        .min_by_key(|&(i, d)| (d, i))
}

/// Mutual nearest neighbours, best first, capped at `max_matches`.
fn cross_checked_matches(query: &[Feature], train: &[Feature], params: &AlignParams) -> Vec<Match> {
    let backward: Vec<Option<usize>> = train.iter().map(|t| best_match(t, query).map(|(i, _)| i)).collect();
    let mut matches: Vec<Match> = query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let (ti, distance) = best_match(q, train)?;
            (backward[ti] == Some(qi) && distance <= params.max_hamming).then_some(Match {
                query: qi,
                train: ti,
                distance,
            })
        })
        .collect();
    matches.sort_by_key(|m| (m.distance, m.query));
    matches.truncate(params.max_matches);
    matches
}

fn ransac(src: &[(f64, f64)], dst: &[(f64, f64)], params: &AlignParams) -> Option<(Matrix3<f64>, usize)> {
    let n = src.len();
    if n < 4 {
        return None;
    }
    let mut rng = Lcg::new(params.seed ^ n as u64);
    let mut best: Option<(Matrix3<f64>, Vec<usize>)> = None;
    for _ in 0..params.iterations {
        let sample = rng.distinct_four(n);
        let s: Vec<_> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<_> = sample.iter().map(|&i| dst[i]).collect();
        let Some(h) = fit_homography(&s, &d) else {
            continue;
        };
        let inliers = inliers_of(&h, src, dst, params.ransac_threshold);
        if best.as_ref().is_none_or(|(_, b)| inliers.len() > b.len()) {
            let all = inliers.len() == n;
            best = Some((h, inliers));
            if all {
                break;
            }
        }
    }
    let (h, inliers) = best?;
    // Refit on the consensus set.
    let s: Vec<_> = inliers.iter().map(|&i| src[i]).collect();
    let d: Vec<_> = inliers.iter().map(|&i| dst[i]).collect();
    let refined = fit_homography(&s, &d).unwrap_or(h);
    let count = inliers_of(&refined, src, dst, params.ransac_threshold).len();
    Some((refined, count))
}

fn inliers_of(h: &Matrix3<f64>, src: &[(f64, f64)], dst: &[(f64, f64)], threshold: f64) -> Vec<usize> {
    src.iter()
        .zip(dst.iter())
        .enumerate()
        .filter(|(_, (s, d))| {
            let p = h * Vector3::new(s.0, s.1, 1.0);
            if p.z.abs() < 1e-12 {
                return false;
            }
            let (dx, dy) = (p.x / p.z - d.0, p.y / p.z - d.1);
            (dx * dx + dy * dy).sqrt() <= threshold
        })
        .map(|(i, _)| i)
        .collect()
}

/// Similarity transform taking the points to zero mean, mean distance √2.
fn normalizer(points: &[(f64, f64)]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean = points.iter().map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()).sum::<f64>() / n;
    let s = if mean > 1e-12 { SQRT_2 / mean } else { 1.0 };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Normalized DLT; least squares for more than four correspondences.
fn fit_homography(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }
    let ts = normalizer(src);
    let td = normalizer(dst);
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let p = ts * Vector3::new(s.0, s.1, 1.0);
        let q = td * Vector3::new(d.0, d.1, 1.0);
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let r1 = SVector::<f64, 9>::from_column_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        let r2 = SVector::<f64, 9>::from_column_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
        ata += r1 * r1.transpose() + r2 * r2.transpose();
    }
    let eigen = SymmetricEigen::new(ata);
    let (idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(idx);
    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let m = td.try_inverse()? * normalized * ts;
    if m[(2, 2)].abs() < 1e-12 {
        return None;
    }
    let m = m / m[(2, 2)];
    m.iter().all(|v| v.is_finite()).then_some(m)
}

/// Rejects flips, collapses and extreme perspective.
fn is_plausible(m: &Matrix3<f64>) -> bool {
    let det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
    (0.1..=10.0).contains(&det) && m[(2, 0)].abs() < 1e-2 && m[(2, 1)].abs() < 1e-2
}

/// Small deterministic generator for the sampling pattern and RANSAC draws.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1)
    }

    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    fn below(&mut self, n: u32) -> u32 {
        self.next_u32() % n
    }

    fn distinct_four(&mut self, n: usize) -> [usize; 4] {
        let mut picked = [usize::MAX; 4];
        let mut k = 0;
        while k < 4 {
            let i = self.below(n as u32) as usize;
            if !picked[..k].contains(&i) {
                picked[k] = i;
                k += 1;
            }
        }
        picked
    }
}
