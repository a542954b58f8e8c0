//! Observable background summary task.
//!
//! ```text
//!   spawn ──► Pending ──┬──► Ready(text)
//!                       └──► Failed(reason)   (error or timeout)
//! ```
//!
//! The state only moves forward; once settled it never changes again.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use super::DifferenceSummarizer;
use crate::core::RasterImage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum AnalysisState {
    Pending,
    Ready(String),
    Failed(String),
}

impl AnalysisState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, AnalysisState::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisHandle {
    rx: watch::Receiver<AnalysisState>,
}

impl AnalysisHandle {
    /// Start summarizing on the runtime; returns immediately.
    pub fn spawn(
        summarizer: Arc<dyn DifferenceSummarizer>,
        reference: RasterImage,
        comparison: RasterImage,
        limit: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(AnalysisState::Pending);
        tokio::spawn(async move {
            let name = summarizer.name().to_string();
            let state = match tokio::time::timeout(limit, summarizer.summarize(&reference, &comparison)).await {
                Ok(Ok(text)) => {
                    info!(summarizer = %name, "difference summary ready");
                    AnalysisState::Ready(text)
                }
                Ok(Err(err)) => {
                    warn!(summarizer = %name, error = %err, "difference summary failed");
                    AnalysisState::Failed(err.to_string())
                }
                Err(_) => {
                    warn!(summarizer = %name, timeout_ms = limit.as_millis() as u64, "difference summary timed out");
                    AnalysisState::Failed(format!("timed out after {} ms", limit.as_millis()))
                }
            };
            // Nobody listening is fine.
            let _ = tx.send(state);
        });
        Self { rx }
    }

    /// Current state without waiting.
    pub fn state(&self) -> AnalysisState {
        self.rx.borrow().clone()
    }

    /// Wait until the task settles.
    pub async fn wait(&self) -> AnalysisState {
        let mut rx = self.rx.clone();
        match rx.wait_for(AnalysisState::is_settled).await {
            Ok(state) => state.clone(),
            // Sender dropped without settling: the task panicked.
            Err(_) => AnalysisState::Failed("analysis task ended unexpectedly".to_string()),
        }
    }
}
