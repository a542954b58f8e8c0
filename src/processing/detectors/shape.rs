//! Polygon moments and Hu-invariant shape distance.
//!
//! Moments are integrated over the polygon outline (Green's theorem), so a
//! contour and a scaled or rotated copy of it produce near-identical Hu
//! invariants.

use imageproc::geometry::convex_hull;
use imageproc::point::Point as IpPoint;

/// Invariants with magnitude below this are ignored when comparing shapes.
const HU_EPSILON: f64 = 1e-5;

/// Raw spatial moments up to third order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
    pub m30: f64,
    pub m21: f64,
    pub m12: f64,
    pub m03: f64,
}

impl Moments {
    pub fn of_polygon(points: &[IpPoint<i32>]) -> Self {
        let n = points.len();
        if n < 3 {
            return Self::default();
        }
        let (mut a00, mut a10, mut a01, mut a20, mut a11, mut a02) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let (mut a30, mut a21, mut a12, mut a03) = (0.0, 0.0, 0.0, 0.0);
        let mut prev = points[n - 1];
        for &cur in points {
            let (xp, yp) = (prev.x as f64, prev.y as f64);
            let (x, y) = (cur.x as f64, cur.y as f64);
            let dxy = xp * y - x * yp;
            let xs = xp + x;
            let ys = yp + y;
            a00 += dxy;
            a10 += dxy * xs;
            a01 += dxy * ys;
            a20 += dxy * (xp * xs + x * x);
            a11 += dxy * (xp * (ys + yp) + x * (ys + y));
            a02 += dxy * (yp * ys + y * y);
            a30 += dxy * xs * (xp * xp + x * x);
            a03 += dxy * ys * (yp * yp + y * y);
            a21 += dxy * (xp * xp * (3.0 * yp + y) + 2.0 * x * xp * ys + x * x * (yp + 3.0 * y));
            a12 += dxy * (yp * yp * (3.0 * xp + x) + 2.0 * y * yp * xs + y * y * (xp + 3.0 * x));
            prev = cur;
        }
        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Self {
            m00: sign * a00 / 2.0,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
            m20: sign * a20 / 12.0,
            m11: sign * a11 / 24.0,
            m02: sign * a02 / 12.0,
            m30: sign * a30 / 20.0,
            m21: sign * a21 / 60.0,
            m12: sign * a12 / 60.0,
            m03: sign * a03 / 20.0,
        }
    }

    pub fn area(&self) -> f64 {
        self.m00
    }

    /// The seven Hu invariants. All zero for degenerate (zero-area) shapes.
    pub fn hu(&self) -> [f64; 7] {
        let m00 = self.m00;
        if m00.abs() < f64::EPSILON {
            return [0.0; 7];
        }
        let cx = self.m10 / m00;
        let cy = self.m01 / m00;
        let mu20 = self.m20 - cx * self.m10;
        let mu11 = self.m11 - cx * self.m01;
        let mu02 = self.m02 - cy * self.m01;
        let mu30 = self.m30 - cx * (3.0 * mu20 + cx * self.m10);
        let mu21 = self.m21 - cx * (2.0 * mu11 + cx * self.m01) - cy * mu20;
        let mu12 = self.m12 - cy * (2.0 * mu11 + cy * self.m10) - cx * mu02;
        let mu03 = self.m03 - cy * (3.0 * mu02 + cy * self.m01);

        let s2 = m00 * m00;
        let s3 = s2 * m00.sqrt();
        let (n20, n11, n02) = (mu20 / s2, mu11 / s2, mu02 / s2);
        let (n30, n21, n12, n03) = (mu30 / s3, mu21 / s3, mu12 / s3, mu03 / s3);

        let t0 = n30 + n12;
        let t1 = n21 + n03;
        let q0 = n30 - 3.0 * n12;
        let q1 = 3.0 * n21 - n03;
        let d = n20 - n02;
        [
            n20 + n02,
            d * d + 4.0 * n11 * n11,
            q0 * q0 + q1 * q1,
            t0 * t0 + t1 * t1,
            q0 * t0 * (t0 * t0 - 3.0 * t1 * t1) + q1 * t1 * (3.0 * t0 * t0 - t1 * t1),
            d * (t0 * t0 - t1 * t1) + 4.0 * n11 * t0 * t1,
            q1 * t0 * (t0 * t0 - 3.0 * t1 * t1) - q0 * t1 * (3.0 * t0 * t0 - t1 * t1),
        ]
    }
}

/// Sum of `|1/m_a - 1/m_b|` over log-scaled Hu invariants.
pub fn hu_distance(a: &[f64; 7], b: &[f64; 7]) -> f64 {
    a.iter()
        .zip(b)
        .filter(|(x, y)| x.abs() > HU_EPSILON && y.abs() > HU_EPSILON)
        .map(|(&x, &y)| {
            let mx = x.signum() * x.abs().log10();
            let my = y.signum() * y.abs().log10();
            (1.0 / mx - 1.0 / my).abs()
        })
        .sum()
}

/// Polygon area over convex hull area; 1.0 for convex shapes.
pub fn solidity(points: &[IpPoint<i32>], area: f64) -> f64 {
    let hull = convex_hull(points);
    let hull_area = Moments::of_polygon(&hull).area();
    if hull_area <= f64::EPSILON {
        return 0.0;
    }
    (area / hull_area).clamp(0.0, 1.0)
}
