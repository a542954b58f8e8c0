//! # Architectural Drawing Comparison
//!
//! Overlays two revisions of an architectural drawing so that what changed is
//! visible at a glance, and optionally scores how much changed.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `source`: rasterization of PDFs and raster files
//! - `processing`: annotation removal, normalization, alignment, compositing
//!   and similarity scoring, plus the [`ComparisonPipeline`] tying them together
//! - `core`: rasters, masks, geometry and the bounded worker pool
//! - `session`: live interactive alignment keyed by session id
//! - `analysis`: optional remote prose summaries of the differences
//! - `config`: TOML-backed pipeline settings and session defaults
//!
//! ## Data Flow
//!
//! ```text
//! rasterize ─► detect annotations ─► remove ─► normalize / align ─► composite
//!                                                          └──────► score, heatmap
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use archidiff::{ComparisonPipeline, PipelineConfig};
//! use archidiff::source::AutoRasterizer;
//!
//! # async fn example() -> archidiff::DiffResult<()> {
//! let pipeline = ComparisonPipeline::builder()
//!     .with_config(PipelineConfig::default())
//!     .build()?;
//! let outcome = pipeline
//!     .run_documents(
//!         Arc::new(AutoRasterizer::default()),
//!         "rev-a.pdf".as_ref(),
//!         "rev-b.pdf".as_ref(),
//!     )
//!     .await?;
//! for overlay in &outcome.overlays {
//!     overlay.image.save(format!("{}.png", overlay.mode.as_str()))?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod processing;
pub mod session;
pub mod source;

/// Re-export error types for convenience
pub use error::{DiffError, DiffResult, HasRecoverySuggestion, HasSeverity, Recoverable, Retryable};

pub use config::PipelineConfig;
pub use core::{AnnotationMask, ComparisonPair, GeometricTransform, RasterImage};
pub use processing::{ComparisonOutcome, ComparisonPipeline, OverlayMode, SimilarityResult, SimilarityStatus};
pub use session::{SessionId, SessionStore};
