//! # Pipeline Configuration
//!
//! All tunables of a comparison run, loadable from TOML. Every section and
//! field has a default, so an empty file (or no file) is a valid configuration.
//!
//! ## Sections
//!
//! | Section     | Controls                                             |
//! |-------------|------------------------------------------------------|
//! | `render`    | rasterization scale and page                         |
//! | `masking`   | annotation mask dilation and contour detection       |
//! | `removal`   | fill vs. inpaint, passes                             |
//! | `alignment` | aspect tolerance, optional feature-based alignment   |
//! | `composite` | channels, opacity, thickness, intersection highlight |
//! | `scoring`   | SSIM scoring and heatmap                             |
//! | `upscale`   | integer enlargement before comparison                |
//! | `timeouts`  | limits for collaborator calls                        |
//! | `summary`   | optional remote difference summary                   |
//!
//! ## Example
//!
//! ```toml
//! modes = ["structure", "intersection"]
//!
//! [removal]
//! method = "inpaint"
//! inpaint_radius = 5
//!
//! [alignment]
//! auto_align = true
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Point;
use crate::error::{DiffError, DiffResult};
use crate::processing::align::AlignParams;
use crate::processing::composite::{
    BlendMode, Channel, CompositeConfig, MAX_THICKNESS, MIN_THICKNESS, StructureSignal,
};
use crate::processing::detectors::contours::{self, ContourDetector, ContourSelection};
use crate::processing::mask::AnnotationDetector;
use crate::processing::pipeline::OverlayMode;
use crate::processing::removal::RemovalPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub render: RenderConfig,
    pub masking: MaskingConfig,
    pub removal: RemovalConfig,
    pub alignment: AlignmentConfig,
    pub composite: CompositeSection,
    pub scoring: ScoringConfig,
    pub upscale: UpscaleConfig,
    pub timeouts: TimeoutConfig,
    pub summary: SummaryConfig,
    /// Overlays produced per run, in order.
    pub modes: Vec<OverlayMode>,
    /// Concurrent CPU-heavy jobs.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            masking: MaskingConfig::default(),
            removal: RemovalConfig::default(),
            alignment: AlignmentConfig::default(),
            composite: CompositeSection::default(),
            scoring: ScoringConfig::default(),
            upscale: UpscaleConfig::default(),
            timeouts: TimeoutConfig::default(),
            summary: SummaryConfig::default(),
            modes: vec![OverlayMode::Structure],
            workers: crate::core::worker_pool::DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Multiplier over 72 DPI; 3.0 renders at 216 DPI.
    pub scale_factor: f32,
    /// Zero-based page of multi-page documents.
    pub page: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            scale_factor: 3.0,
            page: 0,
        }
    }
}

/// Built-in annotation detector used when the caller supplies none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Nothing is removed.
    #[default]
    None,
    /// Threshold + outer contours within the area band.
    Contours,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    /// Square dilation kernel applied to detected regions.
    pub dilation: u32,
    pub detector: DetectorKind,
    /// Gray level at or below which a pixel is ink for contour detection.
    pub binary_threshold: u8,
    pub min_contour_area: f64,
    pub max_contour_area: f64,
    /// Restrict contour removal to shapes under these points. Empty removes
    /// every contour in the area band.
    pub select_at: Vec<Point>,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            dilation: crate::processing::mask::DEFAULT_DILATION,
            detector: DetectorKind::None,
            binary_threshold: contours::DEFAULT_THRESHOLD,
            min_contour_area: contours::DEFAULT_MIN_AREA,
            max_contour_area: contours::DEFAULT_MAX_AREA,
            select_at: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMethod {
    Fill,
    Inpaint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalConfig {
    pub method: RemovalMethod,
    pub inpaint_radius: u32,
    pub fill_color: [u8; 3],
    /// Detect-and-remove rounds; stops early once nothing is found.
    pub passes: u32,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            method: RemovalMethod::Fill,
            inpaint_radius: crate::processing::removal::DEFAULT_INPAINT_RADIUS,
            fill_color: crate::processing::removal::WHITE,
            passes: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub aspect_tolerance: f64,
    /// Try feature-based registration before falling back to a plain resize.
    pub auto_align: bool,
    pub max_matches: usize,
    pub min_matches: usize,
    pub ransac_threshold: f64,
    pub fast_threshold: u8,
    pub max_keypoints: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        let params = AlignParams::default();
        Self {
            aspect_tolerance: crate::core::ASPECT_TOLERANCE,
            auto_align: false,
            max_matches: params.max_matches,
            min_matches: params.min_matches,
            ransac_threshold: params.ransac_threshold,
            fast_threshold: params.fast_threshold,
            max_keypoints: params.max_keypoints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeSection {
    pub reference_channel: Channel,
    pub comparison_channel: Channel,
    pub opacity: f32,
    pub thickness: u32,
    /// Signal level counted as "ink present" in intersection mode.
    pub presence_threshold: u8,
    pub intersection_color: [u8; 3],
}

impl Default for CompositeSection {
    fn default() -> Self {
        let base = CompositeConfig::default();
        Self {
            reference_channel: base.reference_channel,
            comparison_channel: base.comparison_channel,
            opacity: base.opacity,
            thickness: base.thickness,
            presence_threshold: crate::processing::composite::PRESENCE_THRESHOLD,
            intersection_color: crate::processing::composite::BOTH_COLOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub enabled: bool,
    /// Local difference percent counted towards `diff_area_percent`.
    pub significant_difference: f64,
    /// Heat share of the heatmap blend.
    pub heatmap_weight: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            significant_difference: crate::processing::similarity::SIGNIFICANT_DIFFERENCE,
            heatmap_weight: crate::processing::similarity::HEATMAP_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleConfig {
    /// `1` disables upscaling.
    pub factor: u32,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self { factor: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub detection_ms: u64,
    pub upscale_ms: u64,
    pub summary_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            detection_ms: 60_000,
            upscale_ms: 120_000,
            summary_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn detection(&self) -> Duration {
        Duration::from_millis(self.detection_ms)
    }

    pub fn upscale(&self) -> Duration {
        Duration::from_millis(self.upscale_ms)
    }

    pub fn summary(&self) -> Duration {
        Duration::from_millis(self.summary_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_dimension: u32,
    /// Extra attempts after a transient network failure.
    pub max_retries: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: crate::analysis::gemini::DEFAULT_MODEL.to_string(),
            api_key_env: crate::analysis::gemini::DEFAULT_API_KEY_ENV.to_string(),
            max_dimension: crate::analysis::gemini::DEFAULT_MAX_DIMENSION,
            max_retries: crate::analysis::gemini::DEFAULT_MAX_RETRIES,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> DiffResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DiffError::io("read_config", e).with_path(path.display().to_string()))?;
        let config: PipelineConfig = toml::from_str(&text)
            .map_err(|e| DiffError::config(Some(path.display().to_string()), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DiffResult<()> {
        if !self.render.scale_factor.is_finite() || self.render.scale_factor <= 0.0 {
            return Err(DiffError::validation(
                "render.scale_factor",
                "must be a finite value > 0",
                self.render.scale_factor.to_string(),
            ));
        }
        if self.removal.method == RemovalMethod::Inpaint && self.removal.inpaint_radius == 0 {
            return Err(DiffError::validation("removal.inpaint_radius", "must be >= 1", "0"));
        }
        if self.masking.min_contour_area >= self.masking.max_contour_area {
            return Err(DiffError::validation(
                "masking.min_contour_area",
                "must be below max_contour_area",
                self.masking.min_contour_area.to_string(),
            ));
        }
        if !self.alignment.aspect_tolerance.is_finite() || self.alignment.aspect_tolerance < 0.0 {
            return Err(DiffError::validation(
                "alignment.aspect_tolerance",
                "must be a finite value >= 0",
                self.alignment.aspect_tolerance.to_string(),
            ));
        }
        if self.alignment.min_matches < 4 {
            return Err(DiffError::validation(
                "alignment.min_matches",
                "a homography needs at least 4 matches",
                self.alignment.min_matches.to_string(),
            ));
        }
        if self.alignment.max_matches < self.alignment.min_matches {
            return Err(DiffError::validation(
                "alignment.max_matches",
                "must be >= min_matches",
                self.alignment.max_matches.to_string(),
            ));
        }
        if !(MIN_THICKNESS..=MAX_THICKNESS).contains(&self.composite.thickness) {
            return Err(DiffError::validation(
                "composite.thickness",
                "must be within 1..=10",
                self.composite.thickness.to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.scoring.heatmap_weight) {
            return Err(DiffError::validation(
                "scoring.heatmap_weight",
                "must be within 0.0..=1.0",
                self.scoring.heatmap_weight.to_string(),
            ));
        }
        if self.upscale.factor == 0 {
            return Err(DiffError::validation("upscale.factor", "must be >= 1", "0"));
        }
        if self.modes.is_empty() {
            return Err(DiffError::validation("modes", "at least one overlay mode", "[]"));
        }
        self.composite_config(OverlayMode::Structure).validate()
    }

    pub fn removal_policy(&self) -> RemovalPolicy {
        match self.removal.method {
            RemovalMethod::Fill => RemovalPolicy::Fill {
                color: self.removal.fill_color,
            },
            RemovalMethod::Inpaint => RemovalPolicy::Inpaint {
                radius: self.removal.inpaint_radius,
            },
        }
    }

    /// Contour detector built from the `masking` section.
    pub fn contour_detector(&self) -> ContourDetector {
        let m = &self.masking;
        let selection = if m.select_at.is_empty() {
            ContourSelection::All
        } else {
            ContourSelection::AtPoints {
                points: m.select_at.clone(),
            }
        };
        ContourDetector {
            threshold: m.binary_threshold,
            min_area: m.min_contour_area,
            max_area: m.max_contour_area,
            selection,
            ..ContourDetector::default()
        }
    }

    /// The detector named by `masking.detector`, if any.
    pub fn configured_detector(&self) -> Option<Arc<dyn AnnotationDetector>> {
        match self.masking.detector {
            DetectorKind::None => None,
            DetectorKind::Contours => Some(Arc::new(self.contour_detector())),
        }
    }

    /// Compositor settings for one overlay mode.
    pub fn composite_config(&self, mode: OverlayMode) -> CompositeConfig {
        let c = &self.composite;
        let (blend, signal) = match mode {
            OverlayMode::Intersection => (
                BlendMode::Intersection {
                    threshold: c.presence_threshold,
                    color: c.intersection_color,
                },
                StructureSignal::Inverted,
            ),
            OverlayMode::Skeleton => (BlendMode::Additive, StructureSignal::Skeleton),
            OverlayMode::Structure | OverlayMode::Heatmap => (BlendMode::Additive, StructureSignal::Inverted),
        };
        CompositeConfig {
            reference_channel: c.reference_channel,
            comparison_channel: c.comparison_channel,
            opacity: c.opacity,
            thickness: c.thickness,
            blend,
            signal,
        }
    }

    pub fn align_params(&self) -> AlignParams {
        let a = &self.alignment;
        AlignParams {
            max_matches: a.max_matches,
            min_matches: a.min_matches,
            ransac_threshold: a.ransac_threshold,
            fast_threshold: a.fast_threshold,
            max_keypoints: a.max_keypoints,
            ..AlignParams::default()
        }
    }
}
