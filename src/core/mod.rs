//! # Core Data Model
//!
//! Rasters, masks, geometry and the bounded worker pool shared by every
//! pipeline stage.

pub mod geometry;
pub mod mask;
pub mod morphology;
pub mod pair;
pub mod raster;
pub mod worker_pool;

pub use geometry::{GeometricTransform, Homography, Point, Polygon};
pub use mask::AnnotationMask;
pub use pair::{ASPECT_TOLERANCE, AspectWarning, ComparisonPair, Registration};
pub use raster::RasterImage;
pub use worker_pool::WorkerPool;
