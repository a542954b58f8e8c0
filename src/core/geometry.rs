//! Planar geometry shared by masking, normalization and the alignment session.

use imageproc::geometric_transformations::Projection;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{DiffError, DiffResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Ordered vertex list describing a removable region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    /// Axis-aligned rectangle, as produced by box detectors.
    pub fn rect(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(vec![
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    /// At least three finite vertices.
    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= 3 && self.vertices.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }

    /// `(min_x, min_y, max_x, max_y)`
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.vertices.first()?;
        Some(self.vertices.iter().fold(
            (first.x, first.y, first.x, first.y),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        ))
    }

    /// Unsigned shoelace area.
    pub fn area(&self) -> f32 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let twice: f32 = (0..n)
            .map(|i| {
                let a = self.vertices[i];
                let b = self.vertices[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();
        twice.abs() / 2.0
    }
}

/// Parameters of the affine map from a drawing's native raster into the
/// shared comparison frame.
///
/// Applied as non-uniform scale about the image centre, then rotation about
/// the image centre (positive degrees turn the drawing counter-clockwise on
/// screen), then translation in pixels. The order is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometricTransform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation_degrees: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Default for GeometricTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl GeometricTransform {
    pub const fn identity() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            rotation_degrees: 0.0,
            translate_x: 0.0,
            translate_y: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Reject non-finite values and non-positive scales.
    pub fn validate(&self) -> DiffResult<()> {
        for (field, value) in [("scale_x", self.scale_x), ("scale_y", self.scale_y)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(DiffError::validation(field, "must be a finite value > 0", value.to_string()));
            }
        }
        for (field, value) in [
            ("rotation_degrees", self.rotation_degrees),
            ("translate_x", self.translate_x),
            ("translate_y", self.translate_y),
        ] {
            if !value.is_finite() {
                return Err(DiffError::validation(field, "must be finite", value.to_string()));
            }
        }
        Ok(())
    }

    /// Forward matrix (source pixel -> frame pixel) for a raster centred at `center`.
    pub fn matrix(&self, center: (f64, f64)) -> Matrix3<f64> {
        translation(self.translate_x, self.translate_y)
            * about(center, rotation(self.rotation_degrees))
            * about(center, scaling(self.scale_x, self.scale_y))
    }

    pub fn projection(&self, center: (f64, f64)) -> DiffResult<Projection> {
        projection_from(&self.matrix(center))
    }
}

pub(crate) fn translation(tx: f64, ty: f64) -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0)
}

pub(crate) fn scaling(sx: f64, sy: f64) -> Matrix3<f64> {
    Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0)
}

/// Counter-clockwise on screen for positive degrees (y axis points down).
pub(crate) fn rotation(degrees: f64) -> Matrix3<f64> {
    let (s, c) = degrees.to_radians().sin_cos();
    Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0)
}

pub(crate) fn about(center: (f64, f64), m: Matrix3<f64>) -> Matrix3<f64> {
    translation(center.0, center.1) * m * translation(-center.0, -center.1)
}

/// Row-major `f32` conversion for imageproc warps.
pub fn projection_from(m: &Matrix3<f64>) -> DiffResult<Projection> {
    let mut flat = [0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            flat[r * 3 + c] = m[(r, c)] as f32;
        }
    }
    Projection::from_matrix(flat)
        .ok_or_else(|| DiffError::validation("transform", "matrix must be invertible", format!("{:?}", flat)))
}

/// Projective map between two image planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    pub matrix: Matrix3<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Map `p`; `None` when it lands on the line at infinity.
    pub fn apply(&self, p: Point) -> Option<Point> {
        let v = self.matrix * Vector3::new(p.x as f64, p.y as f64, 1.0);
        if v.z.abs() < 1e-12 {
            return None;
        }
        Some(Point::new((v.x / v.z) as f32, (v.y / v.z) as f32))
    }

    pub fn projection(&self) -> DiffResult<Projection> {
        projection_from(&self.matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_validity() {
        assert!(Polygon::rect(0.0, 0.0, 5.0, 5.0).is_valid());
        assert!(!Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).is_valid());
        assert!(!Polygon::new(vec![Point::new(0.0, f32::NAN), Point::new(1.0, 1.0), Point::new(2.0, 0.0)]).is_valid());
        assert_eq!(Polygon::rect(1.0, 2.0, 4.0, 3.0).area(), 12.0);
    }

    #[test]
    fn identity_matrix_is_identity() {
        let m = GeometricTransform::identity().matrix((50.0, 25.0));
        assert!((m - Matrix3::identity()).norm() < 1e-12);
    }

    #[test]
    fn scale_then_rotate_differs_from_rotate_then_scale() {
        let t = GeometricTransform {
            scale_x: 2.0,
            scale_y: 0.5,
            rotation_degrees: 30.0,
            translate_x: 5.0,
            translate_y: -3.0,
        };
        let c = (40.0, 20.0);
        let documented = t.matrix(c);
        let swapped = translation(t.translate_x, t.translate_y)
            * about(c, scaling(t.scale_x, t.scale_y))
            * about(c, rotation(t.rotation_degrees));
        assert!((documented - swapped).norm() > 1e-3);
    }

    #[test]
    fn positive_rotation_is_counter_clockwise_on_screen() {
        // A point to the right of centre moves up (smaller y).
        let m = GeometricTransform {
            rotation_degrees: 90.0,
            ..GeometricTransform::identity()
        }
        .matrix((0.0, 0.0));
        let h = Homography { matrix: m };
        let p = h.apply(Point::new(10.0, 0.0)).unwrap();
        assert!(p.x.abs() < 1e-4);
        assert!((p.y + 10.0).abs() < 1e-4);
    }

    #[test]
    fn validate_rejects_bad_scale() {
        let t = GeometricTransform {
            scale_x: -1.0,
            ..GeometricTransform::identity()
        };
        assert!(t.validate().is_err());
        assert!(GeometricTransform::identity().validate().is_ok());
    }
}
