//! # Geometric Normalization
//!
//! Brings the comparison drawing onto the reference grid. Three routes:
//!
//! - **Baseline**: resample to the reference size (area averaging when
//!   shrinking, bilinear when enlarging) and flag mismatched proportions.
//! - **Explicit**: baseline, then one warp through
//!   [`GeometricTransform::matrix`] (scale, then rotate, then translate, all
//!   about the image centre).
//! - **Auto-align**: see [`crate::processing::align`].
//!
//! Uncovered pixels take a constant border value: white for raw drawings
//! (paper), zero for structural signals (no ink).

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use tracing::{debug, instrument, warn};

use crate::core::{AspectWarning, ComparisonPair, GeometricTransform, RasterImage, Registration};
use crate::error::DiffResult;

/// Fill value for pixels a warp leaves uncovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    /// Blank paper.
    Paper,
    /// No signal.
    Zero,
}

impl Border {
    fn value(self) -> u8 {
        match self {
            Border::Paper => 255,
            Border::Zero => 0,
        }
    }
}

/// Resample `comparison` to the reference size and check proportions.
#[instrument(skip_all, fields(reference = %reference.size(), comparison = %comparison.size()))]
pub fn baseline(reference: RasterImage, comparison: &RasterImage, aspect_tolerance: f64) -> DiffResult<ComparisonPair> {
    let aspect_warning = AspectWarning::check(reference.size().aspect(), comparison.size().aspect(), aspect_tolerance);
    if let Some(w) = &aspect_warning {
        warn!(
            reference_aspect = w.reference_aspect,
            comparison_aspect = w.comparison_aspect,
            "aspect ratios differ; comparison may look distorted"
        );
    }
    let resized = comparison.resized_to(reference.size())?;
    ComparisonPair::new(reference, resized, Registration::Baseline, aspect_warning)
}

/// Baseline resize, or baseline plus `transform` when one is given.
pub fn normalize_pair(
    reference: RasterImage,
    comparison: &RasterImage,
    transform: Option<&GeometricTransform>,
    aspect_tolerance: f64,
) -> DiffResult<ComparisonPair> {
    match transform {
        Some(t) => normalize_explicit(reference, comparison, t, aspect_tolerance),
        None => baseline(reference, comparison, aspect_tolerance),
    }
}

/// Baseline resize followed by an explicit transform of the comparison.
pub fn normalize_explicit(
    reference: RasterImage,
    comparison: &RasterImage,
    transform: &GeometricTransform,
    aspect_tolerance: f64,
) -> DiffResult<ComparisonPair> {
    transform.validate()?;
    let mut pair = baseline(reference, comparison, aspect_tolerance)?;
    if !transform.is_identity() {
        let (w, h) = pair.dimensions();
        pair.comparison = apply_transform(&pair.comparison, transform, (w, h), Border::Paper)?;
    }
    pair.registration = Registration::Explicit(*transform);
    Ok(pair)
}

/// Centre used for a raster of the given size.
pub fn center_of(size: (u32, u32)) -> (f64, f64) {
    (size.0 as f64 / 2.0, size.1 as f64 / 2.0)
}

/// Warp `image` through `transform` into an `out_size` frame.
///
/// The transform is composed into a single matrix so the raster is resampled
/// once.
pub fn apply_transform(
    image: &RasterImage,
    transform: &GeometricTransform,
    out_size: (u32, u32),
    border: Border,
) -> DiffResult<RasterImage> {
    transform.validate()?;
    if transform.is_identity() && image.dimensions() == out_size {
        return Ok(image.clone());
    }
    let projection = transform.projection(center_of(image.dimensions()))?;
    debug!(?transform, "warping");
    Ok(warp_raster(image, &projection, out_size, border))
}

/// Warp a grayscale signal through `transform`, keeping its size.
pub fn transform_signal(signal: &GrayImage, transform: &GeometricTransform) -> DiffResult<GrayImage> {
    if transform.is_identity() {
        return Ok(signal.clone());
    }
    transform.validate()?;
    let projection = transform.projection(center_of(signal.dimensions()))?;
    let mut out = GrayImage::new(signal.width(), signal.height());
    warp_into(signal, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
    Ok(out)
}

pub(crate) fn warp_raster(image: &RasterImage, projection: &Projection, out_size: (u32, u32), border: Border) -> RasterImage {
    let (w, h) = out_size;
    let fill = border.value();
    match image {
        RasterImage::Gray(g) => {
            let mut out = GrayImage::new(w, h);
            warp_into(g, projection, Interpolation::Bilinear, Luma([fill]), &mut out);
            RasterImage::Gray(out)
        }
        RasterImage::Rgb(c) => {
            let mut out = RgbImage::new(w, h);
            warp_into(c, projection, Interpolation::Bilinear, Rgb([fill; 3]), &mut out);
            RasterImage::Rgb(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(w: u32, h: u32) -> RasterImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        for x in 0..w {
            img.put_pixel(x, h / 2, Luma([0]));
        }
        RasterImage::Gray(img)
    }

    #[test]
    fn baseline_matches_reference_size() {
        let pair = baseline(sheet(200, 100), &sheet(100, 50), ASPECT).unwrap();
        assert_eq!(pair.comparison.dimensions(), (200, 100));
        assert!(pair.aspect_warning.is_none());
        assert_eq!(pair.registration, Registration::Baseline);
    }

    #[test]
    fn baseline_shrinks_larger_comparison() {
        let pair = baseline(sheet(100, 50), &sheet(400, 200), ASPECT).unwrap();
        assert_eq!(pair.comparison.dimensions(), (100, 50));
    }

    #[test]
    fn distorted_aspect_is_flagged_but_still_resized() {
        let pair = baseline(sheet(200, 100), &sheet(100, 100), ASPECT).unwrap();
        let w = pair.aspect_warning.expect("2.0 vs 1.0 should warn");
        assert!((w.delta() - 1.0).abs() < 1e-9);
        assert_eq!(pair.comparison.dimensions(), (200, 100));
    }

    #[test]
    fn identity_transform_keeps_pixels() {
        let img = sheet(64, 32);
        let out = apply_transform(&img, &GeometricTransform::identity(), (64, 32), Border::Paper).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn translation_moves_content_and_fills_paper() {
        let t = GeometricTransform {
            translate_y: 5.0,
            ..GeometricTransform::identity()
        };
        let out = apply_transform(&sheet(64, 32), &t, (64, 32), Border::Paper).unwrap().to_gray();
        assert_eq!(out.get_pixel(30, 21).0[0], 0);
        assert_eq!(out.get_pixel(30, 16).0[0], 255);
        assert_eq!(out.get_pixel(30, 2).0[0], 255);
    }

    #[test]
    fn scale_then_rotate_differs_from_rotate_then_scale() {
        let mut img = GrayImage::from_pixel(80, 80, Luma([255]));
        for x in 50..70 {
            img.put_pixel(x, 40, Luma([0]));
        }
        let img = RasterImage::Gray(img);
        let t = GeometricTransform {
            scale_x: 2.0,
            rotation_degrees: 90.0,
            ..GeometricTransform::identity()
        };
        let fixed_order = apply_transform(&img, &t, (80, 80), Border::Paper).unwrap().to_gray();

        // Rotate first, then scale x: the vertical stroke stays thin.
        let rotated = apply_transform(
            &img,
            &GeometricTransform {
                rotation_degrees: 90.0,
                ..GeometricTransform::identity()
            },
            (80, 80),
            Border::Paper,
        )
        .unwrap();
        let other_order = apply_transform(
            &rotated,
            &GeometricTransform {
                scale_x: 2.0,
                ..GeometricTransform::identity()
            },
            (80, 80),
            Border::Paper,
        )
        .unwrap()
        .to_gray();

        assert_ne!(fixed_order, other_order);
    }

    #[test]
    fn explicit_route_records_transform() {
        let t = GeometricTransform {
            rotation_degrees: 3.0,
            ..GeometricTransform::identity()
        };
        let pair = normalize_explicit(sheet(120, 60), &sheet(60, 30), &t, ASPECT).unwrap();
        assert_eq!(pair.dimensions(), (120, 60));
        assert_eq!(pair.transform(), Some(t));
    }

    #[test]
    fn signals_get_zero_border() {
        let signal = GrayImage::from_pixel(20, 20, Luma([200]));
        let t = GeometricTransform {
            translate_x: 10.0,
            ..GeometricTransform::identity()
        };
        let out = transform_signal(&signal, &t).unwrap();
        assert_eq!(out.get_pixel(2, 10).0[0], 0);
        assert_eq!(out.get_pixel(15, 10).0[0], 200);
    }

    const ASPECT: f64 = crate::core::ASPECT_TOLERANCE;
}
