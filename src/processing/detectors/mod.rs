//! Concrete [`AnnotationDetector`](crate::processing::mask::AnnotationDetector) backends.
//!
//! - [`RegionListDetector`]: polygons handed over by an external OCR or
//!   object-detection service
//! - [`ContourDetector`]: threshold + contour extraction with point and
//!   shape-similarity selection, the basis of click-to-remove tooling
//! - [`LineSelector`]: Canny + Hough segments picked by clicking near a stroke

pub mod contours;
pub mod lines;
pub mod regions;
pub mod shape;

pub use contours::{ContourDetector, ContourSelection};
pub use lines::{LineSelector, Segment};
pub use regions::{RegionFile, RegionListDetector};
