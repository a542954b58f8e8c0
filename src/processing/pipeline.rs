//! # Comparison Pipeline
//!
//! End-to-end orchestration of one drawing comparison:
//!
//! ```text
//!  reference ─► upscale ─► detect+remove ─┐
//!                                          ├─► normalize ─► overlays (per mode)
//!  comparison ─► upscale ─► detect+remove ─┘        │      similarity score
//!                                                   └────► summary (background)
//! ```
//!
//! The two per-drawing preparations run concurrently on the bounded
//! [`WorkerPool`]. Collaborator failures follow a fixed policy:
//!
//! - detection failure or timeout: continue with the uncleaned drawing and
//!   record a [`PipelineWarning`]
//! - alignment with too few matches: fall back to baseline resize, warn
//! - upscale timeout: fail the run with a retryable `Timeout`
//! - load or dimension errors: fail the run
//!
//! ## Example
//!
//! ```rust,no_run
//! use archidiff::processing::pipeline::ComparisonPipeline;
//! use archidiff::config::PipelineConfig;
//! use archidiff::core::RasterImage;
//!
//! # async fn demo(reference: RasterImage, comparison: RasterImage) -> archidiff::error::DiffResult<()> {
//! let pipeline = ComparisonPipeline::builder()
//!     .with_config(PipelineConfig::default())
//!     .build()?;
//! let outcome = pipeline.run(reference, comparison).await?;
//! println!("{} overlays, {} warnings", outcome.overlays.len(), outcome.warnings.len());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::analysis::{AnalysisHandle, DifferenceSummarizer};
use crate::config::PipelineConfig;
use crate::core::{AspectWarning, ComparisonPair, GeometricTransform, RasterImage, WorkerPool};
use crate::error::{DiffError, DiffResult, ErrorSeverity, InputRole, Recoverable};
use crate::processing::align::auto_align;
use crate::processing::composite::compose_images;
use crate::processing::mask::{AnnotationDetector, MaskProvider, NullDetector};
use crate::processing::normalize::{baseline, normalize_pair};
use crate::processing::removal::remove_iteratively;
use crate::processing::similarity::{SimilarityResult, heatmap, score_with_threshold};
use crate::processing::upscale::{InterpolatingUpscaler, Upscaler};
use crate::source::Rasterizer;

/// Which overlay to render. Each is a distinct, explicitly chosen view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    /// Inverted drawings in two channels, overlap as a mixed hue.
    Structure,
    /// Pixel-exact overlap highlighted in a dedicated colour.
    Intersection,
    /// Centre-line skeletons, additive.
    Skeleton,
    /// SSIM difference heat over the reference.
    Heatmap,
}

impl OverlayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OverlayMode::Structure => "structure",
            OverlayMode::Intersection => "intersection",
            OverlayMode::Skeleton => "skeleton",
            OverlayMode::Heatmap => "heatmap",
        }
    }
}

/// Degradations that did not stop the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PipelineWarning {
    /// Annotations were left in place for this drawing.
    DetectionDegraded { role: InputRole, reason: String },
    /// Feature alignment failed; the baseline resize was used.
    AlignmentFallback { reason: String },
    AspectRatio(AspectWarning),
}

#[derive(Debug, Clone)]
pub struct Overlay {
    pub mode: OverlayMode,
    pub image: RgbImage,
}

#[derive(Debug)]
pub struct ComparisonOutcome {
    pub reference_cleaned: RasterImage,
    pub comparison_cleaned: RasterImage,
    pub pair: ComparisonPair,
    pub overlays: Vec<Overlay>,
    pub similarity: Option<SimilarityResult>,
    pub warnings: Vec<PipelineWarning>,
    /// Present when a summarizer was configured; settles in the background.
    pub analysis: Option<AnalysisHandle>,
}

pub struct ComparisonPipeline {
    config: PipelineConfig,
    reference_detector: Arc<dyn AnnotationDetector>,
    comparison_detector: Arc<dyn AnnotationDetector>,
    upscaler: Arc<dyn Upscaler>,
    summarizer: Option<Arc<dyn DifferenceSummarizer>>,
    transform: Option<GeometricTransform>,
    pool: WorkerPool,
}

impl std::fmt::Debug for ComparisonPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparisonPipeline")
            .field("reference_detector", &self.reference_detector.name())
            .field("comparison_detector", &self.comparison_detector.name())
            .field("upscaler", &self.upscaler.name())
            .field("summarizer", &self.summarizer.as_ref().map(|s| s.name().to_string()))
            .field("transform", &self.transform)
            .field("pool", &self.pool)
            .finish()
    }
}

impl ComparisonPipeline {
    pub fn builder() -> ComparisonPipelineBuilder {
        ComparisonPipelineBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Rasterize both documents, then [`run`](Self::run).
    pub async fn run_documents(
        &self,
        rasterizer: Arc<dyn Rasterizer>,
        reference: &Path,
        comparison: &Path,
    ) -> DiffResult<ComparisonOutcome> {
        let (page, scale) = (self.config.render.page, self.config.render.scale_factor);
        let load = |role: InputRole, path: &Path| {
            let rasterizer = rasterizer.clone();
            let path = path.to_path_buf();
            async move {
                self.pool
                    .run("rasterize", move || rasterizer.rasterize(&path, page, scale))
                    .await?
                    .map_err(|e| e.with_role(role))
            }
        };
        let (reference, comparison) = tokio::join!(
            load(InputRole::Reference, reference),
            load(InputRole::Comparison, comparison)
        );
        self.run(reference?, comparison?).await
    }

    /// Compare two rasters.
    #[instrument(skip_all, fields(reference = %reference.size(), comparison = %comparison.size()))]
    pub async fn run(&self, reference: RasterImage, comparison: RasterImage) -> DiffResult<ComparisonOutcome> {
        let (reference_prep, comparison_prep) = tokio::join!(
            self.prepare(InputRole::Reference, reference, self.reference_detector.clone()),
            self.prepare(InputRole::Comparison, comparison, self.comparison_detector.clone()),
        );
        let (reference_cleaned, mut warnings) = reference_prep?;
        let (comparison_cleaned, comparison_warnings) = comparison_prep?;
        warnings.extend(comparison_warnings);

        let (pair, normalize_warnings) = self.normalize(&reference_cleaned, &comparison_cleaned).await?;
        warnings.extend(normalize_warnings);

        let overlays = self.render_overlays(&pair).await?;

        let similarity = if self.config.scoring.enabled {
            let (a, b) = (pair.reference.clone(), pair.comparison.clone());
            let threshold = self.config.scoring.significant_difference;
            Some(
                self.pool
                    .run("score", move || score_with_threshold(&a, &b, threshold))
                    .await??,
            )
        } else {
            None
        };

        let analysis = self.summarizer.as_ref().map(|summarizer| {
            AnalysisHandle::spawn(
                summarizer.clone(),
                reference_cleaned.clone(),
                comparison_cleaned.clone(),
                self.config.timeouts.summary(),
            )
        });

        info!(
            overlays = overlays.len(),
            warnings = warnings.len(),
            score = similarity.map(|s| s.score),
            "comparison complete"
        );
        Ok(ComparisonOutcome {
            reference_cleaned,
            comparison_cleaned,
            pair,
            overlays,
            similarity,
            warnings,
            analysis,
        })
    }

    /// Upscale then clean one drawing.
    async fn prepare(
        &self,
        role: InputRole,
        image: RasterImage,
        detector: Arc<dyn AnnotationDetector>,
    ) -> DiffResult<(RasterImage, Vec<PipelineWarning>)> {
        let timeouts = &self.config.timeouts;
        let factor = self.config.upscale.factor;
        let image = if factor > 1 {
            let upscaler = self.upscaler.clone();
            let name = upscaler.name().to_string();
            self.pool
                .run_with_timeout("upscale", timeouts.upscale(), move || upscaler.upscale(&image, factor))
                .await
                .map_err(|e| {
                    e.with_severity(ErrorSeverity::Fatal)
                        .with_recovery_suggestion("Retry the comparison or raise timeouts.upscale_ms")
                })?
                .map_err(|e| DiffError::collaborator(name, e).with_severity(ErrorSeverity::Fatal))?
        } else {
            image
        };

        let provider = MaskProvider::new(detector, self.config.masking.dilation);
        let policy = self.config.removal_policy();
        let passes = self.config.removal.passes;
        let original = image.clone();
        let cleaned = self
            .pool
            .run_with_timeout("detect_annotations", timeouts.detection(), move || {
                remove_iteratively(&image, &provider, policy, passes)
            })
            .await;

        let mut warnings = Vec::new();
        let image = match cleaned {
            Ok(Ok((image, None))) => image,
            Ok(Ok((image, Some(err)))) => {
                warnings.push(degraded(role, &err));
                image
            }
            Ok(Err(err)) => return Err(err.with_role(role)),
            Err(err @ DiffError::Timeout { .. }) => {
                warn!(%role, error = %err, "annotation detection timed out, continuing uncleaned");
                warnings.push(degraded(role, &err));
                original
            }
            Err(err) => return Err(err),
        };
        Ok((image, warnings))
    }

    async fn normalize(
        &self,
        reference: &RasterImage,
        comparison: &RasterImage,
    ) -> DiffResult<(ComparisonPair, Vec<PipelineWarning>)> {
        let (reference, comparison) = (reference.clone(), comparison.clone());
        let transform = self.transform;
        let tolerance = self.config.alignment.aspect_tolerance;
        let auto = self.config.alignment.auto_align;
        let params = self.config.align_params();
        self.pool
            .run("normalize", move || -> DiffResult<(ComparisonPair, Vec<PipelineWarning>)> {
                let mut warnings = Vec::new();
                let pair = match transform {
                    Some(t) => normalize_pair(reference, &comparison, Some(&t), tolerance)?,
                    None if auto => match auto_align(reference.clone(), &comparison, &params, tolerance) {
                        Ok(pair) => pair,
                        Err(err) if err.is_recoverable() => {
                            warn!(error = %err, "auto-alignment failed, using baseline resize");
                            warnings.push(PipelineWarning::AlignmentFallback {
                                reason: err.to_string(),
                            });
                            baseline(reference, &comparison, tolerance)?
                        }
                        Err(err) => return Err(err),
                    },
                    None => baseline(reference, &comparison, tolerance)?,
                };
                if let Some(w) = pair.aspect_warning {
                    warnings.push(PipelineWarning::AspectRatio(w));
                }
                Ok((pair, warnings))
            })
            .await?
    }

    async fn render_overlays(&self, pair: &ComparisonPair) -> DiffResult<Vec<Overlay>> {
        let jobs = self.config.modes.iter().map(|&mode| {
            let (a, b) = (pair.reference.clone(), pair.comparison.clone());
            let composite = self.config.composite_config(mode);
            let weight = self.config.scoring.heatmap_weight;
            self.pool.run(mode.as_str(), move || -> DiffResult<Overlay> {
                let image = match mode {
                    OverlayMode::Heatmap => heatmap(&a, &b, weight)?,
                    _ => compose_images(&a, &b, &composite)?,
                };
                Ok(Overlay { mode, image })
            })
        });
        join_all(jobs).await.into_iter().map(|r| r.and_then(|overlay| overlay)).collect()
    }
}

fn degraded(role: InputRole, err: &DiffError) -> PipelineWarning {
    PipelineWarning::DetectionDegraded {
        role,
        reason: err.to_string(),
    }
}

/// Fluent construction of a [`ComparisonPipeline`].
#[derive(Default)]
pub struct ComparisonPipelineBuilder {
    config: Option<PipelineConfig>,
    reference_detector: Option<Arc<dyn AnnotationDetector>>,
    comparison_detector: Option<Arc<dyn AnnotationDetector>>,
    upscaler: Option<Arc<dyn Upscaler>>,
    summarizer: Option<Arc<dyn DifferenceSummarizer>>,
    transform: Option<GeometricTransform>,
    workers: Option<usize>,
}

impl ComparisonPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Same detector for both drawings. Without one, `masking.detector`
    /// decides.
    pub fn with_detector(mut self, detector: Arc<dyn AnnotationDetector>) -> Self {
        self.reference_detector = Some(detector.clone());
        self.comparison_detector = Some(detector);
        self
    }

    pub fn with_reference_detector(mut self, detector: Arc<dyn AnnotationDetector>) -> Self {
        self.reference_detector = Some(detector);
        self
    }

    pub fn with_comparison_detector(mut self, detector: Arc<dyn AnnotationDetector>) -> Self {
        self.comparison_detector = Some(detector);
        self
    }

    pub fn with_upscaler(mut self, upscaler: Arc<dyn Upscaler>) -> Self {
        self.upscaler = Some(upscaler);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn DifferenceSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Use an explicit transform instead of baseline or auto alignment.
    pub fn with_transform(mut self, transform: GeometricTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Overrides `config.workers`.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn build(self) -> DiffResult<ComparisonPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        if let Some(t) = &self.transform {
            t.validate()?;
        }
        let fallback: Arc<dyn AnnotationDetector> =
            config.configured_detector().unwrap_or_else(|| Arc::new(NullDetector));
        Ok(ComparisonPipeline {
            pool: WorkerPool::new(self.workers.unwrap_or(config.workers)),
            reference_detector: self.reference_detector.unwrap_or_else(|| fallback.clone()),
            comparison_detector: self.comparison_detector.unwrap_or(fallback),
            upscaler: self.upscaler.unwrap_or_else(|| Arc::new(InterpolatingUpscaler)),
            summarizer: self.summarizer,
            transform: self.transform,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Polygon, Registration};
    use image::{GrayImage, Luma};
    use std::time::Duration;

    struct Failing;

    impl AnnotationDetector for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn detect(&self, _: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
            anyhow::bail!("model unavailable")
        }
    }

    struct Slow;

    impl Upscaler for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn upscale(&self, image: &RasterImage, _: u32) -> anyhow::Result<RasterImage> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(image.clone())
        }
    }

    fn line_sheet(w: u32, h: u32) -> RasterImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        for x in 0..w {
            img.put_pixel(x, h / 2, Luma([0]));
        }
        RasterImage::Gray(img)
    }

    #[tokio::test]
    async fn default_run_produces_structure_overlay() {
        let pipeline = ComparisonPipeline::builder().build().unwrap();
        let outcome = pipeline.run(line_sheet(200, 100), line_sheet(100, 50)).await.unwrap();
        assert_eq!(outcome.overlays.len(), 1);
        assert_eq!(outcome.overlays[0].mode, OverlayMode::Structure);
        assert_eq!(outcome.overlays[0].image.dimensions(), (200, 100));
        assert_eq!(outcome.pair.registration, Registration::Baseline);
        assert!(outcome.warnings.is_empty());
        assert!(outcome.similarity.is_none());
        assert!(outcome.analysis.is_none());
    }

    #[tokio::test]
    async fn detection_failure_degrades_with_warning() {
        let pipeline = ComparisonPipeline::builder()
            .with_comparison_detector(Arc::new(Failing))
            .build()
            .unwrap();
        let outcome = pipeline.run(line_sheet(60, 40), line_sheet(60, 40)).await.unwrap();
        assert_eq!(outcome.comparison_cleaned, line_sheet(60, 40));
        assert!(matches!(
            outcome.warnings.as_slice(),
            [PipelineWarning::DetectionDegraded {
                role: InputRole::Comparison,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn upscale_timeout_is_fatal_and_retryable() {
        use crate::error::{HasSeverity, Retryable};
        let mut config = PipelineConfig::default();
        config.upscale.factor = 2;
        config.timeouts.upscale_ms = 20;
        let pipeline = ComparisonPipeline::builder()
            .with_config(config)
            .with_upscaler(Arc::new(Slow))
            .build()
            .unwrap();
        let err = pipeline.run(line_sheet(20, 20), line_sheet(20, 20)).await.unwrap_err();
        assert_eq!(err.category(), "timeout");
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Fatal);
    }

    #[tokio::test]
    async fn auto_align_falls_back_on_blank_drawings() {
        let mut config = PipelineConfig::default();
        config.alignment.auto_align = true;
        config.scoring.enabled = true;
        config.modes = vec![OverlayMode::Intersection, OverlayMode::Heatmap];
        let pipeline = ComparisonPipeline::builder().with_config(config).build().unwrap();
        let outcome = pipeline.run(line_sheet(120, 80), line_sheet(120, 80)).await.unwrap();
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, PipelineWarning::AlignmentFallback { .. })));
        assert_eq!(outcome.overlays.len(), 2);
        assert_eq!(outcome.overlays[1].mode, OverlayMode::Heatmap);
        let score = outcome.similarity.unwrap();
        assert_eq!(score.score, 1.0);
    }

    #[tokio::test]
    async fn aspect_drift_is_reported() {
        let pipeline = ComparisonPipeline::builder().build().unwrap();
        let outcome = pipeline.run(line_sheet(200, 100), line_sheet(100, 100)).await.unwrap();
        assert!(matches!(outcome.warnings.as_slice(), [PipelineWarning::AspectRatio(_)]));
    }

    #[test]
    fn invalid_transform_is_rejected_at_build() {
        let t = GeometricTransform {
            scale_x: 0.0,
            ..GeometricTransform::identity()
        };
        assert!(ComparisonPipeline::builder().with_transform(t).build().is_err());
    }
}
