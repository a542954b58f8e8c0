//! Normalized drawing pairs.

use serde::Serialize;

use crate::core::geometry::{GeometricTransform, Homography};
use crate::core::raster::RasterImage;
use crate::error::{DiffError, DiffResult};

/// Aspect ratios further apart than this flag a possibly distorted comparison.
pub const ASPECT_TOLERANCE: f64 = 0.3;

/// Soft signal that the two drawings had noticeably different proportions
/// before being forced onto one grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AspectWarning {
    pub reference_aspect: f64,
    pub comparison_aspect: f64,
}

impl AspectWarning {
    pub fn delta(&self) -> f64 {
        (self.reference_aspect - self.comparison_aspect).abs()
    }

    /// `Some` when `|a_ref - a_cmp| > tolerance`.
    pub fn check(reference_aspect: f64, comparison_aspect: f64, tolerance: f64) -> Option<Self> {
        ((reference_aspect - comparison_aspect).abs() > tolerance).then_some(Self {
            reference_aspect,
            comparison_aspect,
        })
    }
}

/// How the comparison drawing reached the reference frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Registration {
    /// Plain resample onto the reference grid.
    Baseline,
    /// Caller-supplied affine parameters.
    Explicit(GeometricTransform),
    /// Estimated from matched features.
    Homography { homography: Homography, inliers: usize },
}

/// Two rasters on one grid.
#[derive(Debug, Clone)]
pub struct ComparisonPair {
    pub reference: RasterImage,
    pub comparison: RasterImage,
    pub registration: Registration,
    pub aspect_warning: Option<AspectWarning>,
}

impl ComparisonPair {
    /// Build a pair, enforcing equal dimensions.
    pub fn new(
        reference: RasterImage,
        comparison: RasterImage,
        registration: Registration,
        aspect_warning: Option<AspectWarning>,
    ) -> DiffResult<Self> {
        if reference.dimensions() != comparison.dimensions() {
            return Err(DiffError::dimension_mismatch(
                "comparison_pair",
                reference.dimensions(),
                comparison.dimensions(),
            ));
        }
        Ok(Self {
            reference,
            comparison,
            registration,
            aspect_warning,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.reference.dimensions()
    }

    pub fn is_distorted(&self) -> bool {
        self.aspect_warning.is_some()
    }

    /// The transform applied to `comparison`, if one was explicit.
    pub fn transform(&self) -> Option<GeometricTransform> {
        match self.registration {
            Registration::Explicit(t) => Some(t),
            _ => None,
        }
    }

    /// Swap roles. Used when the caller wants the other drawing as the base layer.
    pub fn swapped(self) -> Self {
        Self {
            reference: self.comparison,
            comparison: self.reference,
            registration: self.registration,
            aspect_warning: self.aspect_warning.map(|w| AspectWarning {
                reference_aspect: w.comparison_aspect,
                comparison_aspect: w.reference_aspect,
            }),
        }
    }
}
