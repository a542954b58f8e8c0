//! Degrade-or-fail policies of the comparison pipeline

mod common;

use std::sync::Arc;
use std::time::Duration;

use archidiff::analysis::{AnalysisState, DifferenceSummarizer};
use archidiff::core::{Point, Polygon, Registration};
use archidiff::error::InputRole;
use archidiff::processing::pipeline::PipelineWarning;
use archidiff::processing::detectors::regions::BoxRegion;
use archidiff::processing::{AnnotationDetector, RegionFile, RegionListDetector};
use archidiff::source::ImageFileRasterizer;
use archidiff::{ComparisonPipeline, DiffError, GeometricTransform, PipelineConfig, RasterImage};
use async_trait::async_trait;
use common::assertions::only_channel;
use common::drawings::{fill_rect, floor_plan, raster};

struct Stalled;

impl AnnotationDetector for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    fn detect(&self, _image: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(vec![Polygon::rect(0.0, 0.0, 10.0, 10.0)])
    }
}

struct Describe(Result<&'static str, &'static str>);

#[async_trait]
impl DifferenceSummarizer for Describe {
    fn name(&self) -> &str {
        "describe"
    }

    async fn summarize(&self, _reference: &RasterImage, _comparison: &RasterImage) -> anyhow::Result<String> {
        match self.0 {
            Ok(text) => Ok(text.to_string()),
            Err(reason) => anyhow::bail!(reason),
        }
    }
}

/// Floor plan with a block of "text" inside the left room.
fn annotated_plan() -> RasterImage {
    let mut img = floor_plan(200, 150);
    fill_rect(&mut img, 40, 60, 30, 10);
    raster(img)
}

fn label_regions() -> RegionFile {
    RegionFile {
        boxes: vec![BoxRegion {
            x: 38.0,
            y: 58.0,
            w: 34.0,
            h: 14.0,
        }],
        ..RegionFile::default()
    }
}

#[tokio::test]
async fn region_list_removes_labels_before_overlay() {
    let reference = raster(floor_plan(200, 150));

    let uncleaned = ComparisonPipeline::builder().build().unwrap();
    let outcome = uncleaned.run(reference.clone(), annotated_plan()).await.unwrap();
    assert!(only_channel(&outcome.overlays[0].image, 0) > 0, "label should show as comparison-only ink");

    let cleaned = ComparisonPipeline::builder()
        .with_comparison_detector(Arc::new(RegionListDetector::new(label_regions())))
        .build()
        .unwrap();
    let outcome = cleaned.run(reference.clone(), annotated_plan()).await.unwrap();
    assert_eq!(outcome.comparison_cleaned, reference);
    assert_eq!(only_channel(&outcome.overlays[0].image, 0), 0);
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn detection_timeout_keeps_original_and_warns() {
    let mut config = PipelineConfig::default();
    config.timeouts.detection_ms = 20;
    let pipeline = ComparisonPipeline::builder()
        .with_config(config)
        .with_reference_detector(Arc::new(Stalled))
        .build()
        .unwrap();

    let plan = raster(floor_plan(80, 60));
    let outcome = pipeline.run(plan.clone(), plan.clone()).await.unwrap();
    assert_eq!(outcome.reference_cleaned, plan);
    match outcome.warnings.as_slice() {
        [PipelineWarning::DetectionDegraded { role, reason }] => {
            assert_eq!(*role, InputRole::Reference);
            assert!(reason.contains("Timeout"), "{reason}");
        }
        other => panic!("unexpected warnings: {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_comparison_fails_naming_the_input() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("rev_a.png");
    let bad = dir.path().join("rev_b.png");
    floor_plan(60, 40).save(&good).unwrap();
    std::fs::write(&bad, b"not a png").unwrap();

    let pipeline = ComparisonPipeline::builder().build().unwrap();
    let err = pipeline
        .run_documents(Arc::new(ImageFileRasterizer), &good, &bad)
        .await
        .unwrap_err();
    match &err {
        DiffError::LoadFailed { input, role, .. } => {
            assert!(input.ends_with("rev_b.png"), "{input}");
            assert_eq!(*role, Some(InputRole::Comparison));
        }
        other => panic!("expected load failure, got {other}"),
    }
}

#[tokio::test]
async fn documents_on_disk_compare_like_rasters() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    floor_plan(90, 60).save(&a).unwrap();
    floor_plan(90, 60).save(&b).unwrap();

    let mut config = PipelineConfig::default();
    config.scoring.enabled = true;
    let pipeline = ComparisonPipeline::builder().with_config(config).build().unwrap();
    let outcome = pipeline
        .run_documents(Arc::new(ImageFileRasterizer), &a, &b)
        .await
        .unwrap();
    assert_eq!(outcome.pair.reference, outcome.pair.comparison);
    assert_eq!(outcome.similarity.unwrap().score, 1.0);
}

#[tokio::test]
async fn explicit_transform_is_recorded_on_the_pair() {
    let t = GeometricTransform {
        translate_x: 6.0,
        ..GeometricTransform::identity()
    };
    let pipeline = ComparisonPipeline::builder().with_transform(t).build().unwrap();
    let plan = raster(floor_plan(100, 80));
    let outcome = pipeline.run(plan.clone(), plan.clone()).await.unwrap();
    assert_eq!(outcome.pair.registration, Registration::Explicit(t));
    assert_ne!(outcome.pair.comparison, plan);
    assert_eq!(outcome.pair.comparison.dimensions(), (100, 80));
}

#[tokio::test]
async fn summary_settles_in_the_background() {
    let plan = raster(floor_plan(64, 48));

    let pipeline = ComparisonPipeline::builder()
        .with_summarizer(Arc::new(Describe(Ok("partition wall removed"))))
        .build()
        .unwrap();
    let outcome = pipeline.run(plan.clone(), plan.clone()).await.unwrap();
    let handle = outcome.analysis.expect("summarizer configured");
    assert_eq!(handle.wait().await, AnalysisState::Ready("partition wall removed".into()));

    let pipeline = ComparisonPipeline::builder()
        .with_summarizer(Arc::new(Describe(Err("quota exhausted"))))
        .build()
        .unwrap();
    let outcome = pipeline.run(plan.clone(), plan).await.unwrap();
    assert_eq!(outcome.overlays.len(), 1);
    match outcome.analysis.unwrap().wait().await {
        AnalysisState::Failed(reason) => assert!(reason.contains("quota exhausted"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn single_worker_matches_parallel_run() {
    let reference = raster(floor_plan(120, 90));
    let comparison = annotated_plan();

    let parallel = ComparisonPipeline::builder().build().unwrap();
    let sequential = ComparisonPipeline::builder().with_workers(1).build().unwrap();
    let a = parallel.run(reference.clone(), comparison.clone()).await.unwrap();
    let b = sequential.run(reference, comparison).await.unwrap();
    assert_eq!(a.overlays[0].image, b.overlays[0].image);
    assert_eq!(a.pair.comparison, b.pair.comparison);
}

fn contour_config() -> PipelineConfig {
    toml::from_str(
        r#"
        [masking]
        detector = "contours"
        max_contour_area = 5000.0
        "#,
    )
    .unwrap()
}

#[tokio::test]
async fn configured_contour_detector_removes_small_symbols() {
    let reference = floor_plan(200, 150);
    let mut comparison = reference.clone();
    // Outside the walls: contours nested in a room are not outer contours.
    fill_rect(&mut comparison, 4, 60, 10, 10);

    let pipeline = ComparisonPipeline::builder().with_config(contour_config()).build().unwrap();
    let outcome = pipeline.run(raster(reference.clone()), raster(comparison)).await.unwrap();

    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.comparison_cleaned.to_gray(), reference, "symbol should be gone, walls kept");
    assert_eq!(outcome.reference_cleaned.to_gray(), reference);
}

#[tokio::test]
async fn configured_selection_points_limit_contour_removal() {
    let reference = floor_plan(200, 150);
    let mut comparison = reference.clone();
    fill_rect(&mut comparison, 4, 30, 10, 10);
    fill_rect(&mut comparison, 4, 100, 10, 10);

    let mut config = contour_config();
    config.masking.select_at = vec![Point::new(8.0, 104.0)];
    let pipeline = ComparisonPipeline::builder().with_config(config).build().unwrap();
    let outcome = pipeline.run(raster(reference), raster(comparison)).await.unwrap();

    let cleaned = outcome.comparison_cleaned.to_gray();
    assert_eq!(cleaned.get_pixel(8, 34).0[0], 0, "unselected symbol kept");
    assert_eq!(cleaned.get_pixel(8, 104).0[0], 255, "selected symbol removed");
}
