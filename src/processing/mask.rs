//! # Annotation Mask Provider
//!
//! Wraps a pluggable [`AnnotationDetector`] and turns its polygons into a
//! dilated [`AnnotationMask`].
//!
//! Detectors are caller-owned resources: construct once (loading whatever
//! model they need), share through an `Arc`, and reuse across comparisons.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{AnnotationMask, Polygon, RasterImage};
use crate::error::{DiffError, DiffResult};

/// Default structuring element edge at processing resolution.
pub const DEFAULT_DILATION: u32 = 3;

/// "Given an image, return removable regions."
///
/// Implementations may wrap OCR engines, object detectors, or interactive
/// selections. Errors are reported as `anyhow` so backends can carry their
/// own error types; the provider maps them to `DetectionFailed`.
pub trait AnnotationDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, image: &RasterImage) -> anyhow::Result<Vec<Polygon>>;
}

/// Detector that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl AnnotationDetector for NullDetector {
    fn name(&self) -> &str {
        "null"
    }

    fn detect(&self, _image: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
        Ok(Vec::new())
    }
}

#[derive(Clone)]
pub struct MaskProvider {
    detector: Arc<dyn AnnotationDetector>,
    dilation: u32,
}

impl std::fmt::Debug for MaskProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskProvider")
            .field("detector", &self.detector.name())
            .field("dilation", &self.dilation)
            .finish()
    }
}

impl MaskProvider {
    pub fn new(detector: Arc<dyn AnnotationDetector>, dilation: u32) -> Self {
        Self { detector, dilation }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Detect, rasterize and dilate.
    ///
    /// An empty detection yields an all-zero mask. A detector error or an
    /// unusable polygon yields `DetectionFailed`.
    pub fn mask_for(&self, image: &RasterImage) -> DiffResult<AnnotationMask> {
        let polygons = self
            .detector
            .detect(image)
            .map_err(|e| DiffError::detection_failed(self.detector.name(), format!("{:#}", e)))?;
        let (w, h) = image.dimensions();
        if polygons.is_empty() {
            debug!(detector = self.detector.name(), "no annotations detected");
            return Ok(AnnotationMask::empty(w, h));
        }
        let mask = AnnotationMask::from_polygons(w, h, &polygons)
            .map_err(|e| DiffError::detection_failed(self.detector.name(), e.to_string()))?
            .dilated(self.dilation);
        debug!(
            detector = self.detector.name(),
            regions = polygons.len(),
            marked = mask.marked_count(),
            "annotation mask built"
        );
        Ok(mask)
    }

    /// As [`mask_for`](Self::mask_for), degrading failures to an empty mask.
    /// The failure is returned alongside so callers can surface a warning.
    pub fn mask_or_empty(&self, image: &RasterImage) -> (AnnotationMask, Option<DiffError>) {
        match self.mask_for(image) {
            Ok(mask) => (mask, None),
            Err(err) => {
                warn!(detector = self.detector.name(), error = %err, "detection failed, continuing without mask");
                let (w, h) = image.dimensions();
                (AnnotationMask::empty(w, h), Some(err))
            }
        }
    }
}

/// Union of every provider's mask over the same image.
///
/// Unlike [`MaskProvider::mask_or_empty`], any failing provider fails the
/// whole selection: an interactive user asked for each of them.
pub fn combined_mask(providers: &[MaskProvider], image: &RasterImage) -> DiffResult<AnnotationMask> {
    let (w, h) = image.dimensions();
    providers
        .iter()
        .try_fold(AnnotationMask::empty(w, h), |acc, provider| acc.union(&provider.mask_for(image)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Point;
    use image::GrayImage;

    struct Fixed(Vec<Polygon>);

    impl AnnotationDetector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn detect(&self, _image: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl AnnotationDetector for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn detect(&self, _image: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
            anyhow::bail!("model not loaded")
        }
    }

    fn blank() -> RasterImage {
        RasterImage::Gray(GrayImage::from_pixel(30, 30, image::Luma([255])))
    }

    #[test]
    fn empty_detection_gives_empty_mask() {
        let provider = MaskProvider::new(Arc::new(NullDetector), 3);
        assert!(provider.mask_for(&blank()).unwrap().is_empty());
    }

    #[test]
    fn mask_is_dilated() {
        let provider = MaskProvider::new(Arc::new(Fixed(vec![Polygon::rect(10.0, 10.0, 4.0, 4.0)])), 5);
        let mask = provider.mask_for(&blank()).unwrap();
        assert!(mask.is_marked(9, 9));
        assert!(mask.is_marked(8, 8));
        assert!(!mask.is_marked(4, 4));
    }

    #[test]
    fn detector_error_degrades() {
        let provider = MaskProvider::new(Arc::new(Broken), 3);
        let (mask, err) = provider.mask_or_empty(&blank());
        assert!(mask.is_empty());
        assert_eq!(err.map(|e| e.category()), Some("detection_failed"));
    }

    #[test]
    fn combined_mask_unions_providers() {
        let left = MaskProvider::new(Arc::new(Fixed(vec![Polygon::rect(2.0, 2.0, 4.0, 4.0)])), 1);
        let right = MaskProvider::new(Arc::new(Fixed(vec![Polygon::rect(20.0, 20.0, 4.0, 4.0)])), 1);
        let mask = combined_mask(&[left.clone(), right], &blank()).unwrap();
        assert!(mask.is_marked(3, 3));
        assert!(mask.is_marked(21, 21));
        assert!(!mask.is_marked(12, 12));
        assert_eq!(mask.marked_count(), left.mask_for(&blank()).unwrap().marked_count() * 2);

        assert!(combined_mask(&[], &blank()).unwrap().is_empty());
        let broken = MaskProvider::new(Arc::new(Broken), 1);
        assert_eq!(combined_mask(&[left, broken], &blank()).unwrap_err().category(), "detection_failed");
    }

    #[test]
    fn invalid_polygon_is_detection_failure() {
        let bad = Polygon::new(vec![Point::new(0.0, 0.0)]);
        let provider = MaskProvider::new(Arc::new(Fixed(vec![bad])), 3);
        assert_eq!(provider.mask_for(&blank()).unwrap_err().category(), "detection_failed");
    }
}
