//! # Processing Module
//!
//! The comparison stages, bottom-up:
//!
//! 1. [`mask`] / [`detectors`]: find removable annotations
//! 2. [`removal`]: fill or inpaint them
//! 3. [`normalize`] / [`align`]: bring both drawings onto one grid
//! 4. [`composite`]: channel-separated overlays
//! 5. [`similarity`]: SSIM score and heatmap
//!
//! [`pipeline`] strings them together; [`upscale`] is an optional first step.
//! [`layers`] is the manual side: crop, warp and tint two drawings by hand.

pub mod align;
pub mod composite;
pub mod detectors;
pub mod layers;
pub mod mask;
pub mod normalize;
pub mod pipeline;
pub mod removal;
pub mod similarity;
pub mod upscale;

pub use align::{AlignParams, AlignmentOutcome, auto_align};
pub use composite::{BlendMode, Channel, CompositeConfig, StructureSignal, compose, compose_images, tint_layer};
pub use detectors::{ContourDetector, ContourSelection, LineSelector, RegionFile, RegionListDetector};
pub use layers::{LayerSlot, LayerStack};
pub use mask::{AnnotationDetector, MaskProvider, NullDetector, combined_mask};
pub use normalize::{apply_transform, baseline, normalize_explicit, normalize_pair};
pub use pipeline::{ComparisonOutcome, ComparisonPipeline, ComparisonPipelineBuilder, OverlayMode, PipelineWarning};
pub use removal::{RemovalPolicy, remove, remove_iteratively};
pub use similarity::{SimilarityResult, SimilarityStatus, heatmap, score_similarity};
pub use upscale::{InterpolatingUpscaler, Upscaler};
