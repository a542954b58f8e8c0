//! Threshold-and-contour annotation selection.
//!
//! Ink is isolated with an inverted binary threshold, outer contours are
//! extracted, and contours outside an area band are discarded. Which of the
//! remaining contours count as annotations is decided by a
//! [`ContourSelection`]: all of them, those under user-picked points, or
//! those shaped like a picked prototype.

use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::point::Point as IpPoint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::shape::{Moments, hu_distance, solidity};
use crate::core::{Point, Polygon, RasterImage};
use crate::processing::mask::AnnotationDetector;

pub const DEFAULT_THRESHOLD: u8 = 150;
pub const DEFAULT_MIN_AREA: f64 = 50.0;
pub const DEFAULT_MAX_AREA: f64 = 200_000.0;
/// Pixel radii searched around a click that misses every contour.
pub const SEARCH_RADII: [i32; 3] = [5, 10, 15];
const SEARCH_STEP: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ContourSelection {
    /// Every contour within the area band.
    All,
    /// Contours under (or near) any of the points.
    AtPoints { points: Vec<Point> },
    /// The contour under `point` plus up to `max_results` look-alikes.
    SimilarTo { point: Point, max_results: usize },
}

/// Gates for "looks like the prototype".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityGate {
    pub max_shape_distance: f64,
    pub min_area_ratio: f64,
    pub max_area_ratio: f64,
    pub solidity_tolerance: f64,
}

impl Default for SimilarityGate {
    fn default() -> Self {
        Self {
            max_shape_distance: 0.15,
            min_area_ratio: 0.5,
            max_area_ratio: 2.0,
            solidity_tolerance: 0.3,
        }
    }
}

/// An outer contour that passed the area filter.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub points: Vec<IpPoint<i32>>,
    pub area: f64,
    pub solidity: f64,
    pub hu: [f64; 7],
}

impl Candidate {
    fn from_contour(contour: Contour<i32>) -> Self {
        let moments = Moments::of_polygon(&contour.points);
        let area = moments.area();
        Self {
            solidity: solidity(&contour.points, area),
            hu: moments.hu(),
            area,
            points: contour.points,
        }
    }

    /// Inside the outline, or on it.
    pub fn contains(&self, p: Point) -> bool {
        let on_border = self
            .points
            .iter()
            .any(|q| (q.x as f32 - p.x).abs() <= 1.0 && (q.y as f32 - p.y).abs() <= 1.0);
        on_border || point_in_polygon(&self.points, p)
    }

    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(self.points.iter().map(|p| Point::new(p.x as f32, p.y as f32)).collect())
    }
}

fn point_in_polygon(points: &[IpPoint<i32>], p: Point) -> bool {
    let mut inside = false;
    let n = points.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (xi, yi) = (points[i].x as f32, points[i].y as f32);
        let (xj, yj) = (points[j].x as f32, points[j].y as f32);
        if (yi > p.y) != (yj > p.y) && p.x < (xj - xi) * (p.y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourDetector {
    pub threshold: u8,
    pub min_area: f64,
    pub max_area: f64,
    pub selection: ContourSelection,
    pub gate: SimilarityGate,
}

impl Default for ContourDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            max_area: DEFAULT_MAX_AREA,
            selection: ContourSelection::All,
            gate: SimilarityGate::default(),
        }
    }
}

impl ContourDetector {
    pub fn with_selection(mut self, selection: ContourSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// Ink (`<= threshold`) becomes 255, paper becomes 0.
    pub fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let t = self.threshold;
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([if gray.get_pixel(x, y).0[0] > t { 0 } else { 255 }])
        })
    }

    /// Outer contours whose area lies strictly inside `(min_area, max_area)`.
    pub fn candidates(&self, gray: &GrayImage) -> Vec<Candidate> {
        let binary = self.binarize(gray);
        find_contours::<i32>(&binary)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none() && c.points.len() >= 3)
            .map(Candidate::from_contour)
            .filter(|c| c.area > self.min_area && c.area < self.max_area)
            .collect()
    }

    /// Index of the candidate under `point`, widening the search when the
    /// click lands just off a stroke.
    pub fn candidate_at(&self, candidates: &[Candidate], point: Point) -> Option<usize> {
        if let Some(i) = candidates.iter().position(|c| c.contains(point)) {
            return Some(i);
        }
        for r in SEARCH_RADII {
            for dy in (-r..=r).step_by(SEARCH_STEP) {
                for dx in (-r..=r).step_by(SEARCH_STEP) {
                    let nearby = Point::new(point.x + dx as f32, point.y + dy as f32);
                    if let Some(i) = candidates.iter().position(|c| c.contains(nearby)) {
                        return Some(i);
                    }
                }
            }
        }
        None
    }

    /// The prototype followed by its closest look-alikes, best first.
    pub fn similar_to(&self, candidates: &[Candidate], prototype: usize, max_results: usize) -> Vec<usize> {
        let Some(proto) = candidates.get(prototype) else {
            return Vec::new();
        };
        let mut scored: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != prototype)
            .filter_map(|(i, c)| {
                let ratio = c.area / proto.area.max(f64::EPSILON);
                if ratio < self.gate.min_area_ratio || ratio > self.gate.max_area_ratio {
                    return None;
                }
                if (c.solidity - proto.solidity).abs() > self.gate.solidity_tolerance {
                    return None;
                }
                let d = hu_distance(&proto.hu, &c.hu);
                (d < self.gate.max_shape_distance).then_some((i, d))
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        std::iter::once(prototype)
            .chain(scored.into_iter().take(max_results).map(|(i, _)| i))
            .collect()
    }
}

impl AnnotationDetector for ContourDetector {
    fn name(&self) -> &str {
        "contour"
    }

    fn detect(&self, image: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
        let candidates = self.candidates(&image.to_gray());
        let picked: Vec<usize> = match &self.selection {
            ContourSelection::All => (0..candidates.len()).collect(),
            ContourSelection::AtPoints { points } => {
                let mut picked: Vec<usize> = points
                    .iter()
                    .filter_map(|p| self.candidate_at(&candidates, *p))
                    .collect();
                picked.sort_unstable();
                picked.dedup();
                picked
            }
            ContourSelection::SimilarTo { point, max_results } => match self.candidate_at(&candidates, *point) {
                Some(i) => self.similar_to(&candidates, i, *max_results),
                None => Vec::new(),
            },
        };
        debug!(candidates = candidates.len(), picked = picked.len(), "contour selection");
        Ok(picked.into_iter().map(|i| candidates[i].to_polygon()).collect())
    }
}
