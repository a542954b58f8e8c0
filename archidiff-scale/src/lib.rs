// SPDX-License-Identifier: MIT
//! # archidiff-scale: Common-Size Planning and Resampling for Drawing Comparison
//!
//! Comparing two drawings pixel by pixel requires them to live on one grid.
//! This crate decides which grid ([`presets`]) and moves pixels onto it ([`cpu`]).
//!
//! ## Key Components
//!
//! - [`presets`]: `Size`, the three common-size conventions, long-side fitting
//! - [`cpu`]: SIMD resampling of 8-bit gray/RGB buffers via fast_image_resize
//!
//! ## Resampling Policy
//!
//! - Shrinking uses area averaging so hairlines fade rather than alias away
//! - Enlarging uses bilinear interpolation
//! - Explicit upscaling passes may request Catmull-Rom cubic
//!
//! ## Usage Example
//!
//! ```rust
//! use archidiff_scale::cpu::{resize_u8, ResizeKind};
//! use archidiff_scale::presets::{common_size, Size, SizeConvention};
//!
//! let reference = Size::new(200, 100);
//! let comparison = Size::new(100, 50);
//! let target = common_size(reference, comparison, SizeConvention::Reference);
//!
//! let mut resizer = fast_image_resize::Resizer::new();
//! let gray = vec![255u8; (comparison.w * comparison.h) as usize];
//! let kind = ResizeKind::for_sizes(comparison, target);
//! let out = resize_u8(&mut resizer, &gray, comparison, 1, target, kind)?;
//! assert_eq!(out.len(), 200 * 100);
//! # Ok::<(), archidiff_scale::cpu::ScaleError>(())
//! ```

pub mod cpu;
pub mod presets;
