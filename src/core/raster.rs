//! Owned pixel grids passed between pipeline stages.

use std::io::Cursor;
use std::path::Path;

use archidiff_scale::cpu::{ResizeKind, resize_u8};
use archidiff_scale::presets::Size;
use fast_image_resize::Resizer;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

use crate::error::{DiffError, DiffResult};

/// A width×height grid of 8-bit pixels, single-channel or RGB.
///
/// Transforms return a new `RasterImage`; only annotation removal edits in place.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterImage {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl RasterImage {
    /// Keep gray sources gray; everything else becomes RGB (alpha is dropped).
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(g) => RasterImage::Gray(g),
            DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
                RasterImage::Gray(image.to_luma8())
            }
            other => RasterImage::Rgb(other.to_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            RasterImage::Gray(g) => g.width(),
            RasterImage::Rgb(c) => c.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            RasterImage::Gray(g) => g.height(),
            RasterImage::Rgb(c) => c.height(),
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn channels(&self) -> u8 {
        match self {
            RasterImage::Gray(_) => 1,
            RasterImage::Rgb(_) => 3,
        }
    }

    pub fn as_raw(&self) -> &[u8] {
        match self {
            RasterImage::Gray(g) => g.as_raw(),
            RasterImage::Rgb(c) => c.as_raw(),
        }
    }

    pub fn to_gray(&self) -> GrayImage {
        match self {
            RasterImage::Gray(g) => g.clone(),
            RasterImage::Rgb(c) => image::imageops::grayscale(c),
        }
    }

    pub fn to_rgb(&self) -> RgbImage {
        match self {
            RasterImage::Gray(g) => DynamicImage::ImageLuma8(g.clone()).to_rgb8(),
            RasterImage::Rgb(c) => c.clone(),
        }
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            RasterImage::Gray(g) => DynamicImage::ImageLuma8(g.clone()),
            RasterImage::Rgb(c) => DynamicImage::ImageRgb8(c.clone()),
        }
    }

    /// Resample onto `target`, keeping the channel layout.
    pub fn resized(&self, target: Size, kind: ResizeKind) -> DiffResult<RasterImage> {
        let mut resizer = Resizer::new();
        let data = resize_u8(&mut resizer, self.as_raw(), self.size(), self.channels(), target, kind)?;
        let out = match self {
            RasterImage::Gray(_) => GrayImage::from_raw(target.w, target.h, data).map(RasterImage::Gray),
            RasterImage::Rgb(_) => RgbImage::from_raw(target.w, target.h, data).map(RasterImage::Rgb),
        };
        out.ok_or_else(|| DiffError::validation("resize", "output buffer matches target size", target.to_string()))
    }

    /// Resample with the direction-appropriate kernel.
    pub fn resized_to(&self, target: Size) -> DiffResult<RasterImage> {
        self.resized(target, ResizeKind::for_sizes(self.size(), target))
    }

    pub fn open(path: &Path) -> DiffResult<Self> {
        let image = image::open(path)
            .map_err(|e| DiffError::load_failed(path.display().to_string(), e.to_string()))?;
        Ok(Self::from_dynamic(image))
    }

    pub fn save(&self, path: &Path) -> DiffResult<()> {
        self.to_dynamic()
            .save(path)
            .map_err(|e| DiffError::image("save", e).with_context(path.display().to_string()))
    }

    pub fn encode_png(&self) -> DiffResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.to_dynamic()
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| DiffError::image("encode_png", e))?;
        Ok(buf.into_inner())
    }
}

impl From<GrayImage> for RasterImage {
    fn from(value: GrayImage) -> Self {
        RasterImage::Gray(value)
    }
}

impl From<RgbImage> for RasterImage {
    fn from(value: RgbImage) -> Self {
        RasterImage::Rgb(value)
    }
}
