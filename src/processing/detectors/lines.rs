//! Straight-stroke selection.
//!
//! Edges come from Canny, candidate lines from a Hough transform. Each
//! infinite Hough line is walked across the edge map and split into finite
//! segments wherever the edge trail breaks for more than `max_gap` pixels.
//! A click selects the nearest segment within `click_radius`; selected
//! segments are returned as thin quads so a [`MaskProvider`] can remove them.
//!
//! [`MaskProvider`]: crate::processing::mask::MaskProvider

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::hough::{LineDetectionOptions, PolarLine, detect_lines};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{Point, Polygon, RasterImage};
use crate::processing::mask::AnnotationDetector;

/// A finite stroke between two pixel positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    pub fn length(&self) -> f32 {
        self.start.distance(self.end)
    }

    /// Shortest distance from `p` to any point of the segment.
    pub fn distance_to(&self, p: Point) -> f32 {
        let (dx, dy) = (self.end.x - self.start.x, self.end.y - self.start.y);
        let len2 = dx * dx + dy * dy;
        if len2 <= f32::EPSILON {
            return self.start.distance(p);
        }
        let t = (((p.x - self.start.x) * dx + (p.y - self.start.y) * dy) / len2).clamp(0.0, 1.0);
        Point::new(self.start.x + t * dx, self.start.y + t * dy).distance(p)
    }

    /// Rectangle of `width` centred on the segment.
    pub fn to_polygon(&self, width: f32) -> Polygon {
        let (dx, dy) = (self.end.x - self.start.x, self.end.y - self.start.y);
        let len = self.length().max(f32::EPSILON);
        let (nx, ny) = (-dy / len * width / 2.0, dx / len * width / 2.0);
        Polygon::new(vec![
            Point::new(self.start.x + nx, self.start.y + ny),
            Point::new(self.end.x + nx, self.end.y + ny),
            Point::new(self.end.x - nx, self.end.y - ny),
            Point::new(self.start.x - nx, self.start.y - ny),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSelector {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Minimum Hough votes for a line.
    pub vote_threshold: u32,
    /// Neighbourhood (pixels and degrees) in which weaker lines are dropped.
    pub suppression_radius: u32,
    pub min_length: f32,
    pub max_gap: u32,
    pub click_radius: f32,
    /// Width of the removal quad drawn over a selected segment.
    pub stroke_width: f32,
    pub points: Vec<Point>,
}

impl Default for LineSelector {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            vote_threshold: 50,
            suppression_radius: 8,
            min_length: 20.0,
            max_gap: 5,
            click_radius: 15.0,
            stroke_width: 5.0,
            points: Vec::new(),
        }
    }
}

impl LineSelector {
    pub fn at_points(points: Vec<Point>) -> Self {
        Self {
            points,
            ..Self::default()
        }
    }

    /// Every segment of at least `min_length` found in the drawing.
    pub fn segments(&self, gray: &GrayImage) -> Vec<Segment> {
        let edges = canny(gray, self.canny_low, self.canny_high);
        let lines = detect_lines(
            &edges,
            LineDetectionOptions {
                vote_threshold: self.vote_threshold,
                suppression_radius: self.suppression_radius,
            },
        );
        let segments: Vec<Segment> = lines.iter().flat_map(|line| self.trace(&edges, line)).collect();
        debug!(lines = lines.len(), segments = segments.len(), "line segments traced");
        segments
    }

    /// Index of the segment nearest `point`, if any lies within `click_radius`.
    pub fn nearest(&self, segments: &[Segment], point: Point) -> Option<usize> {
        segments
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.distance_to(point)))
            .filter(|(_, d)| *d <= self.click_radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Walk `x cos θ + y sin θ = r` across the edge map and cut it into runs.
    fn trace(&self, edges: &GrayImage, line: &PolarLine) -> Vec<Segment> {
        let (w, h) = (edges.width() as f32, edges.height() as f32);
        let (sin, cos) = (line.angle_in_degrees as f32).to_radians().sin_cos();
        let foot = (line.r * cos, line.r * sin);
        let dir = (-sin, cos);
        let reach = (w * w + h * h).sqrt().ceil() as i32;

        let mut segments = Vec::new();
        let mut run: Option<(Point, Point)> = None;
        let mut missed = 0u32;
        for t in -reach..=reach {
            let p = Point::new(foot.0 + t as f32 * dir.0, foot.1 + t as f32 * dir.1);
            if p.x < 0.0 || p.y < 0.0 || p.x > w - 1.0 || p.y > h - 1.0 {
                continue;
            }
            if edge_near(edges, p) {
                missed = 0;
                run = Some(match run {
                    Some((start, _)) => (start, p),
                    None => (p, p),
                });
                continue;
            }
            missed += 1;
            if missed > self.max_gap {
                if let Some((start, end)) = run.take() {
                    self.keep(&mut segments, start, end);
                }
            }
        }
        if let Some((start, end)) = run {
            self.keep(&mut segments, start, end);
        }
        segments
    }

    fn keep(&self, segments: &mut Vec<Segment>, start: Point, end: Point) {
        let segment = Segment { start, end };
        if segment.length() >= self.min_length {
            segments.push(segment);
        }
    }
}

fn edge_near(edges: &GrayImage, p: Point) -> bool {
    let (cx, cy) = (p.x.round() as i64, p.y.round() as i64);
    (-1..=1).any(|dy| {
        (-1..=1).any(|dx| {
            let (x, y) = (cx + dx, cy + dy);
            x >= 0
                && y >= 0
                && x < edges.width() as i64
                && y < edges.height() as i64
                && edges.get_pixel(x as u32, y as u32).0[0] > 0
        })
    })
}

impl AnnotationDetector for LineSelector {
    fn name(&self) -> &str {
        "line"
    }

    fn detect(&self, image: &RasterImage) -> anyhow::Result<Vec<Polygon>> {
        if self.points.is_empty() {
            return Ok(Vec::new());
        }
        let segments = self.segments(&image.to_gray());
        let mut picked: Vec<usize> = self.points.iter().filter_map(|p| self.nearest(&segments, *p)).collect();
        picked.sort_unstable();
        picked.dedup();
        Ok(picked.into_iter().map(|i| segments[i].to_polygon(self.stroke_width)).collect())
    }
}
