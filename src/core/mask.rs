//! Binary annotation masks.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point as IpPoint;

use crate::core::geometry::Polygon;
use crate::core::morphology::dilate_rect;
use crate::error::{DiffError, DiffResult};

pub const MASK_ON: u8 = 255;

/// Single-channel 0/255 raster co-dimensioned with its source image.
/// `255` marks a pixel to remove.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationMask(GrayImage);

impl AnnotationMask {
    /// All-zero mask: nothing to remove.
    pub fn empty(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    /// Wrap an existing image, binarizing any non-zero pixel to 255.
    pub fn from_image(image: GrayImage) -> Self {
        let mut image = image;
        for p in image.pixels_mut() {
            if p.0[0] != 0 {
                p.0[0] = MASK_ON;
            }
        }
        Self(image)
    }

    /// Fill each polygon solid into a zeroed `width × height` mask.
    ///
    /// Vertices are clamped onto the canvas. A polygon with fewer than three
    /// finite vertices is unusable detector output.
    pub fn from_polygons(width: u32, height: u32, polygons: &[Polygon]) -> DiffResult<Self> {
        let mut mask = GrayImage::new(width, height);
        if width == 0 || height == 0 {
            return Ok(Self(mask));
        }
        for (i, polygon) in polygons.iter().enumerate() {
            if !polygon.is_valid() {
                return Err(DiffError::detection_failed(
                    "polygon_rasterizer",
                    format!("polygon {} has {} usable vertices", i, polygon.vertices.len()),
                ));
            }
            let mut points: Vec<IpPoint<i32>> = polygon
                .vertices
                .iter()
                .map(|v| {
                    IpPoint::new(
                        (v.x.round() as i32).clamp(0, width as i32 - 1),
                        (v.y.round() as i32).clamp(0, height as i32 - 1),
                    )
                })
                .collect();
            points.dedup();
            while points.len() > 1 && points.first() == points.last() {
                points.pop();
            }
            match points.len() {
                0 => {}
                1 => mask.put_pixel(points[0].x as u32, points[0].y as u32, Luma([MASK_ON])),
                _ => {
                    // Degenerate (collinear / clamped flat) polygons still cover their outline.
                    draw_polygon_mut(&mut mask, &points, Luma([MASK_ON]));
                    for pair in points.windows(2) {
                        imageproc::drawing::draw_line_segment_mut(
                            &mut mask,
                            (pair[0].x as f32, pair[0].y as f32),
                            (pair[1].x as f32, pair[1].y as f32),
                            Luma([MASK_ON]),
                        );
                    }
                }
            }
        }
        Ok(Self(mask))
    }

    /// Grow marked regions with a `kernel × kernel` rectangle.
    pub fn dilated(&self, kernel: u32) -> Self {
        Self(dilate_rect(&self.0, kernel))
    }

    pub fn union(&self, other: &AnnotationMask) -> DiffResult<Self> {
        if self.0.dimensions() != other.0.dimensions() {
            return Err(DiffError::dimension_mismatch(
                "mask_union",
                self.0.dimensions(),
                other.0.dimensions(),
            ));
        }
        let mut out = self.0.clone();
        for (o, p) in out.pixels_mut().zip(other.0.pixels()) {
            o.0[0] = o.0[0].max(p.0[0]);
        }
        Ok(Self(out))
    }

    pub fn is_empty(&self) -> bool {
        self.0.pixels().all(|p| p.0[0] == 0)
    }

    pub fn marked_count(&self) -> usize {
        self.0.pixels().filter(|p| p.0[0] != 0).count()
    }

    #[inline]
    pub fn is_marked(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y).0[0] != 0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_image(self) -> GrayImage {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Point;

    #[test]
    fn rect_polygon_fills_interior() {
        let mask = AnnotationMask::from_polygons(20, 20, &[Polygon::rect(5.0, 5.0, 4.0, 4.0)]).unwrap();
        assert!(mask.is_marked(7, 7));
        assert!(mask.is_marked(5, 5));
        assert!(!mask.is_marked(12, 12));
        assert!(mask.marked_count() >= 16);
    }

    #[test]
    fn no_polygons_is_empty() {
        let mask = AnnotationMask::from_polygons(10, 10, &[]).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn out_of_bounds_vertices_are_clamped() {
        let mask = AnnotationMask::from_polygons(10, 10, &[Polygon::rect(-5.0, -5.0, 30.0, 30.0)]).unwrap();
        assert_eq!(mask.marked_count(), 100);
    }

    #[test]
    fn short_polygon_is_detection_failure() {
        let bad = Polygon::new(vec![Point::new(1.0, 1.0), Point::new(3.0, 3.0)]);
        let err = AnnotationMask::from_polygons(10, 10, &[bad]).unwrap_err();
        assert_eq!(err.category(), "detection_failed");
    }

    #[test]
    fn dilation_grows_region() {
        let mask = AnnotationMask::from_polygons(20, 20, &[Polygon::rect(8.0, 8.0, 2.0, 2.0)]).unwrap();
        let grown = mask.dilated(3);
        assert!(grown.marked_count() > mask.marked_count());
        assert!(grown.is_marked(7, 7));
    }
}
