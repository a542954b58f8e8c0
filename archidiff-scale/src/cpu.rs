// SPDX-License-Identifier: MIT
// CPU resampler built on fast_image_resize (SIMD-accelerated).
// Tightly packed 8-bit gray or RGB in, freshly allocated buffer of the same layout out.

use fast_image_resize as fir;
use fir::images::{Image, ImageRef};
use fir::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};

use crate::presets::Size;

#[derive(Debug)]
pub enum ScaleError {
    /// Source slice length does not match `w * h * channels`.
    BufferSize { expected: usize, actual: usize },
    /// Only 1 (gray) and 3 (RGB) channel buffers are supported.
    UnsupportedChannels(u8),
    /// Zero-sized source or destination.
    EmptyImage,
    Fir(fir::ResizeError),
    ImageBuf(fir::ImageBufferError),
}

impl From<fir::ResizeError> for ScaleError { fn from(e: fir::ResizeError) -> Self { Self::Fir(e) } }
impl From<fir::ImageBufferError> for ScaleError { fn from(e: fir::ImageBufferError) -> Self { Self::ImageBuf(e) } }

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::BufferSize { expected, actual } => {
                write!(f, "Source buffer has {} bytes, expected {}", actual, expected)
            }
            ScaleError::UnsupportedChannels(c) => write!(f, "Unsupported channel count: {}", c),
            ScaleError::EmptyImage => write!(f, "Cannot resample an empty image"),
            ScaleError::Fir(e) => write!(f, "Fast image resize error: {}", e),
            ScaleError::ImageBuf(e) => write!(f, "Image buffer error: {}", e),
        }
    }
}

impl std::error::Error for ScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScaleError::Fir(e) => Some(e),
            ScaleError::ImageBuf(e) => Some(e),
            _ => None,
        }
    }
}

/// Resampling kernel family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeKind {
    /// Area averaging. Used when shrinking so thin strokes fade instead of vanishing.
    Area,
    /// Bilinear. Used when enlarging.
    Smooth,
    /// Catmull-Rom cubic. Used by the interpolating upscaler.
    Cubic,
}

impl ResizeKind {
    /// Area averaging when both axes shrink or stay, smooth interpolation otherwise.
    pub fn for_sizes(src: Size, dst: Size) -> Self {
        if src.enlarges_to(dst) {
            ResizeKind::Smooth
        } else {
            ResizeKind::Area
        }
    }

    fn alg(self) -> ResizeAlg {
        match self {
            ResizeKind::Area => ResizeAlg::Convolution(FilterType::Box),
            ResizeKind::Smooth => ResizeAlg::Convolution(FilterType::Bilinear),
            ResizeKind::Cubic => ResizeAlg::Convolution(FilterType::CatmullRom),
        }
    }
}

fn pixel_type(channels: u8) -> Result<PixelType, ScaleError> {
    match channels {
        1 => Ok(PixelType::U8),
        3 => Ok(PixelType::U8x3),
        other => Err(ScaleError::UnsupportedChannels(other)),
    }
}

/// Resample a tightly packed 8-bit buffer from `src` to `dst` dimensions.
///
/// Same-size requests return a copy without touching the resizer.
pub fn resize_u8(
    resizer: &mut Resizer,
    data: &[u8],
    src: Size,
    channels: u8,
    dst: Size,
    kind: ResizeKind,
) -> Result<Vec<u8>, ScaleError> {
    let pixel_type = pixel_type(channels)?;
    if src.area() == 0 || dst.area() == 0 {
        return Err(ScaleError::EmptyImage);
    }
    let expected = src.area() as usize * channels as usize;
    if data.len() != expected {
        return Err(ScaleError::BufferSize { expected, actual: data.len() });
    }
    if src == dst {
        return Ok(data.to_vec());
    }

    let src_view = ImageRef::new(src.w, src.h, data, pixel_type)?;
    let mut dst_image = Image::new(dst.w, dst.h, pixel_type);
    let opts = ResizeOptions::new().resize_alg(kind.alg());
    resizer.resize(&src_view, &mut dst_image, &opts)?;
    Ok(dst_image.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_direction() {
        let small = Size::new(100, 50);
        let big = Size::new(200, 100);
        assert_eq!(ResizeKind::for_sizes(big, small), ResizeKind::Area);
        assert_eq!(ResizeKind::for_sizes(small, big), ResizeKind::Smooth);
        assert_eq!(ResizeKind::for_sizes(Size::new(100, 100), Size::new(50, 200)), ResizeKind::Smooth);
    }

    #[test]
    fn rejects_wrong_buffer_length() {
        let mut resizer = Resizer::new();
        let err = resize_u8(&mut resizer, &[0u8; 10], Size::new(4, 4), 1, Size::new(2, 2), ResizeKind::Area);
        assert!(matches!(err, Err(ScaleError::BufferSize { expected: 16, actual: 10 })));
    }

    #[test]
    fn uniform_gray_stays_uniform() {
        let mut resizer = Resizer::new();
        let data = vec![200u8; 40 * 20];
        let out = resize_u8(&mut resizer, &data, Size::new(40, 20), 1, Size::new(13, 7), ResizeKind::Area).unwrap();
        assert_eq!(out.len(), 13 * 7);
        assert!(out.iter().all(|&v| v == 200));
    }

    #[test]
    fn rgb_round_trip_dimensions() {
        let mut resizer = Resizer::new();
        let data = vec![10u8; 8 * 8 * 3];
        let out = resize_u8(&mut resizer, &data, Size::new(8, 8), 3, Size::new(16, 4), ResizeKind::Smooth).unwrap();
        assert_eq!(out.len(), 16 * 4 * 3);
    }

    #[test]
    fn same_size_is_copy() {
        let mut resizer = Resizer::new();
        let data: Vec<u8> = (0..16).collect();
        let out = resize_u8(&mut resizer, &data, Size::new(4, 4), 1, Size::new(4, 4), ResizeKind::Cubic).unwrap();
        assert_eq!(out, data);
    }
}
