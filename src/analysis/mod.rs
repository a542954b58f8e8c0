//! # Difference Summaries
//!
//! Optional natural-language description of how two drawings differ, supplied
//! by an external service. Nothing in the image pipeline waits on or reads
//! the summary; it is started as a background task and observed through an
//! [`AnalysisHandle`].

pub mod gemini;
pub mod handle;

pub use gemini::GeminiSummarizer;
pub use handle::{AnalysisHandle, AnalysisState};

use async_trait::async_trait;

use crate::core::RasterImage;

/// Describe the differences between two drawings in prose.
#[async_trait]
pub trait DifferenceSummarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(&self, reference: &RasterImage, comparison: &RasterImage) -> anyhow::Result<String>;
}
