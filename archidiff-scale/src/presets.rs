// SPDX-License-Identifier: MIT
//! # Common-Size Planning
//!
//! Two drawings can only be composited or scored once they share a pixel grid.
//! Which grid they share is a policy decision, and the comparison tools use
//! three different ones:
//!
//! 1. **Reference**: the comparison drawing is resampled onto the reference's
//!    grid (structure overlay, baseline normalization)
//! 2. **Smaller**: both drawings shrink to the per-axis minimum (similarity
//!    scoring, which must never invent detail by upsampling)
//! 3. **Larger**: both drawings grow to the per-axis maximum (interactive
//!    alignment, which must never discard detail from either source)
//!
//! ## Design Philosophy
//!
//! The convention is chosen by the caller and carried as a value. Nothing in
//! this module guesses which one is "right".
//!
//! ## Performance Considerations
//!
//! - O(1) arithmetic only
//! - Results are clamped to at least 1px on each axis

/// Represents a 2D size with width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// Width divided by height. Degenerate heights count as 1px.
    pub fn aspect(self) -> f64 {
        self.w as f64 / self.h.max(1) as f64
    }

    pub fn area(self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// True when either axis must grow to reach `target`.
    pub fn enlarges_to(self, target: Size) -> bool {
        target.w > self.w || target.h > self.h
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// Selects the shared grid two drawings are resampled onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum SizeConvention {
    /// Keep the first (reference) drawing's size.
    #[clap(name = "reference")]
    Reference,
    /// Per-axis minimum of both drawings.
    #[clap(name = "smaller")]
    Smaller,
    /// Per-axis maximum of both drawings.
    #[clap(name = "larger")]
    Larger,
}

/// Compute the common size of `reference` and `other` under `convention`.
///
/// # Arguments
/// * `reference` - Size of the reference drawing
/// * `other` - Size of the drawing being compared against it
/// * `convention` - Which shared grid to pick
///
/// # Performance
/// O(1)
pub fn common_size(reference: Size, other: Size, convention: SizeConvention) -> Size {
    let out = match convention {
        SizeConvention::Reference => reference,
        SizeConvention::Smaller => Size {
            w: reference.w.min(other.w),
            h: reference.h.min(other.h),
        },
        SizeConvention::Larger => Size {
            w: reference.w.max(other.w),
            h: reference.h.max(other.h),
        },
    };
    Size {
        w: out.w.max(1),
        h: out.h.max(1),
    }
}

/// Fit `input` so its longest side is at most `max_long`, preserving aspect ratio.
///
/// Never upscales: inputs already within the bound are returned unchanged.
/// Used to keep images sent to remote summarizers within their size limits.
pub fn fit_long_side(input: Size, max_long: u32) -> Size {
    let (w, h) = (input.w as f64, input.h as f64);
    let long = w.max(h).max(1.0);
    let s = (max_long as f64 / long).min(1.0);
    Size {
        w: ((w * s).round() as u32).max(1),
        h: ((h * s).round() as u32).max(1),
    }
}

/// Scale `input` by independent per-axis factors, rounding down like a
/// truncating integer cast. Used by the interactive alignment view.
pub fn scale_by(input: Size, sx: f64, sy: f64) -> Size {
    Size {
        w: ((input.w as f64 * sx) as u32).max(1),
        h: ((input.h as f64 * sy) as u32).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventions_pick_expected_grid() {
        let a = Size::new(200, 100);
        let b = Size::new(150, 300);
        assert_eq!(common_size(a, b, SizeConvention::Reference), a);
        assert_eq!(common_size(a, b, SizeConvention::Smaller), Size::new(150, 100));
        assert_eq!(common_size(a, b, SizeConvention::Larger), Size::new(200, 300));
    }

    #[test]
    fn fit_long_side_never_upscales() {
        assert_eq!(fit_long_side(Size::new(500, 200), 1024), Size::new(500, 200));
        assert_eq!(fit_long_side(Size::new(2048, 1024), 1024), Size::new(1024, 512));
        assert_eq!(fit_long_side(Size::new(1000, 4000), 1024), Size::new(256, 1024));
    }

    #[test]
    fn scale_by_truncates_and_clamps() {
        assert_eq!(scale_by(Size::new(101, 51), 0.5, 0.5), Size::new(50, 25));
        assert_eq!(scale_by(Size::new(10, 10), 0.01, 2.0), Size::new(1, 20));
    }

    #[test]
    fn aspect_handles_zero_height() {
        assert_eq!(Size::new(10, 0).aspect(), 10.0);
        assert!((Size::new(200, 100).aspect() - 2.0).abs() < f64::EPSILON);
    }
}
