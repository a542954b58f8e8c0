//! Externally supplied regions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Polygon, RasterImage};
use crate::error::{DiffError, DiffResult};
use crate::processing::mask::AnnotationDetector;

/// Boxes smaller than this are treated as glyph-sized.
pub const TEXT_LIKE_MAX_AREA: f32 = 5000.0;
/// Boxes elongated beyond this ratio are treated as text lines.
pub const TEXT_LIKE_MIN_ASPECT: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxRegion {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoxRegion {
    /// Small or strongly elongated boxes look like text rather than symbols.
    pub fn is_text_like(&self) -> bool {
        let area = self.w * self.h;
        let short = self.w.min(self.h).max(f32::EPSILON);
        let aspect = self.w.max(self.h) / short;
        area < TEXT_LIKE_MAX_AREA || aspect > TEXT_LIKE_MIN_ASPECT
    }
}

/// On-disk region list. Coordinates are in the pixel space of the raster the
/// detector saw; `source_scale` rescales them onto the processing raster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionFile {
    pub polygons: Vec<Polygon>,
    pub boxes: Vec<BoxRegion>,
    pub text_like_only: bool,
    pub source_scale: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RegionListDetector {
    regions: RegionFile,
}

impl RegionListDetector {
    pub fn new(regions: RegionFile) -> Self {
        Self { regions }
    }

    pub fn from_json_file(path: &Path) -> DiffResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DiffError::io("read region list", e).with_path(path.display().to_string()))?;
        let regions: RegionFile = serde_json::from_str(&text).map_err(|e| {
            DiffError::external("serde_json", e).with_context(format!("parsing {}", path.display()))
        })?;
        Ok(Self::new(regions))
    }

    pub fn regions(&self) -> &RegionFile {
        &self.regions
    }
}

impl AnnotationDetector for RegionListDetector {
    fn name(&self) -> &str {
        "region_list"
    }

    fn detect(&self, _image: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
        let scale = self.regions.source_scale.unwrap_or(1.0);
        if !(scale.is_finite() && scale > 0.0) {
            anyhow::bail!("source_scale must be a finite value > 0, got {}", scale);
        }
        let boxes = self
            .regions
            .boxes
            .iter()
            .filter(|b| !self.regions.text_like_only || b.is_text_like())
            .map(|b| Polygon::rect(b.x, b.y, b.w, b.h));
        Ok(self
            .regions
            .polygons
            .iter()
            .cloned()
            .chain(boxes)
            .map(|mut p| {
                for v in &mut p.vertices {
                    v.x *= scale;
                    v.y *= scale;
                }
                p
            })
            .collect())
    }
}
