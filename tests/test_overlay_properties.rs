//! Overlay properties checked end to end through the public API

mod common;

use archidiff::core::ASPECT_TOLERANCE;
use archidiff::processing::composite::BOTH_COLOR;
use archidiff::processing::{compose_images, normalize_pair};
use archidiff::{ComparisonPipeline, OverlayMode, PipelineConfig};
use common::assertions::{assert_background_black, count, only_channel};
use common::drawings::{fill_rect, floor_plan, hline, raster, sheet, texture};

#[tokio::test]
async fn half_scale_revision_overlays_as_single_yellow_line() {
    let mut reference = sheet(200, 100);
    hline(&mut reference, 50, 0, 200);
    let mut comparison = sheet(100, 50);
    hline(&mut comparison, 25, 0, 100);

    let pipeline = ComparisonPipeline::builder().build().unwrap();
    let outcome = pipeline.run(raster(reference), raster(comparison)).await.unwrap();
    let overlay = &outcome.overlays[0].image;

    assert_eq!(overlay.dimensions(), (200, 100));
    for x in 0..200 {
        let [r, g, _] = overlay.get_pixel(x, 50).0;
        assert!(r > 128 && g > 128, "row 50 at x={x} is ({r}, {g})");
    }
    assert_eq!(only_channel(overlay, 1), 0, "reference-only pixels left over");
    // The 2x upscale smears the comparison line over neighbouring rows.
    for (x, y, px) in overlay.enumerate_pixels() {
        let [r, g, b] = px.0;
        if r > 128 && g < 64 && b < 64 {
            assert!((48..=52).contains(&y) && y != 50, "comparison-only pixel at ({x}, {y})");
        }
    }
    assert_background_black(overlay, 100, 10);
}

#[test]
fn swapping_roles_and_colours_is_pixel_identical() {
    let a = raster(floor_plan(120, 80));
    let b = raster(texture(120, 80, 3));
    let config = PipelineConfig::default();
    for mode in [OverlayMode::Structure, OverlayMode::Intersection, OverlayMode::Skeleton] {
        let composite = config.composite_config(mode);
        let forward = compose_images(&a, &b, &composite).unwrap();
        let backward = compose_images(&b, &a, &composite.swapped()).unwrap();
        assert_eq!(forward, backward, "{mode:?} overlay is not symmetric");
    }
}

#[test]
fn overlapping_squares_render_both_colour_exactly() {
    let mut a = sheet(64, 64);
    let mut b = sheet(64, 64);
    fill_rect(&mut a, 10, 10, 30, 30);
    fill_rect(&mut b, 25, 25, 30, 30);

    let composite = PipelineConfig::default().composite_config(OverlayMode::Intersection);
    let out = compose_images(&raster(a), &raster(b), &composite).unwrap();

    for y in 25..40 {
        for x in 25..40 {
            assert_eq!(out.get_pixel(x, y).0, BOTH_COLOR, "overlap at ({x}, {y})");
        }
    }
    assert_eq!(count(&out, |px| px == BOTH_COLOR), 15 * 15);
    assert_eq!(out.get_pixel(15, 15).0, [0, 255, 0]);
    assert_eq!(out.get_pixel(50, 50).0, [255, 0, 0]);
    assert_background_black(&out, 5, 60);
}

#[tokio::test]
async fn every_selected_mode_renders_at_reference_size() {
    let mut config = PipelineConfig::default();
    config.modes = vec![
        OverlayMode::Structure,
        OverlayMode::Intersection,
        OverlayMode::Skeleton,
        OverlayMode::Heatmap,
    ];
    let pipeline = ComparisonPipeline::builder().with_config(config).build().unwrap();
    let outcome = pipeline
        .run(raster(floor_plan(160, 120)), raster(floor_plan(80, 60)))
        .await
        .unwrap();

    let modes: Vec<_> = outcome.overlays.iter().map(|o| o.mode).collect();
    assert_eq!(
        modes,
        [OverlayMode::Structure, OverlayMode::Intersection, OverlayMode::Skeleton, OverlayMode::Heatmap]
    );
    for overlay in &outcome.overlays {
        assert_eq!(overlay.image.dimensions(), (160, 120), "{:?}", overlay.mode);
    }
}

#[test]
fn aspect_warning_fires_only_beyond_tolerance() {
    let wide = raster(sheet(200, 100));
    let square = raster(sheet(100, 100));
    let close = raster(sheet(190, 100));

    let pair = normalize_pair(wide.clone(), &square, None, ASPECT_TOLERANCE).unwrap();
    let warning = pair.aspect_warning.expect("2.0 vs 1.0 should warn");
    assert_eq!(warning.reference_aspect, 2.0);
    assert_eq!(warning.comparison_aspect, 1.0);

    let pair = normalize_pair(wide, &close, None, ASPECT_TOLERANCE).unwrap();
    assert!(pair.aspect_warning.is_none());
    assert_eq!(pair.reference.dimensions(), pair.comparison.dimensions());
}

#[test]
fn normalized_pairs_always_share_dimensions() {
    let reference = raster(floor_plan(150, 90));
    for (w, h) in [(75, 45), (300, 180), (151, 89), (40, 200), (10, 6)] {
        let pair = normalize_pair(reference.clone(), &raster(sheet(w, h)), None, ASPECT_TOLERANCE).unwrap();
        assert_eq!(pair.comparison.dimensions(), (150, 90), "from {w}x{h}");
    }
}
