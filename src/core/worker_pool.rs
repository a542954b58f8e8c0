//! # Worker Pool Module
//!
//! Bounded execution of CPU-heavy per-drawing steps (upscaling, annotation
//! detection and removal) on tokio's blocking thread pool.
//!
//! ## Overview
//!
//! A comparison always involves exactly two drawings, and their cleanup steps
//! are independent. The pool lets both run side by side while capping how many
//! blocking jobs one process has in flight:
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────┐     ┌──────────────────┐
//! │  reference   │────▶│  WorkerPool (2)    │────▶│ spawn_blocking   │
//! │  comparison  │────▶│  ┌──┐ ┌──┐         │     │ (tokio runtime)  │
//! └──────────────┘     │  └──┘ └──┘ permits │     └──────────────────┘
//!                      └────────────────────┘
//! ```
//!
//! ## Characteristics
//!
//! - **Determinism**: jobs are pure functions of their inputs, so a pool of one
//!   produces the same outputs as a pool of two
//! - **Timeouts**: a job that overruns is abandoned by the caller; its permit is
//!   held until the thread actually returns, so the bound stays honest
//!
//! ## Example
//!
//! ```rust,no_run
//! use archidiff::core::WorkerPool;
//! use std::time::Duration;
//!
//! # async fn demo() -> archidiff::DiffResult<()> {
//! let pool = WorkerPool::new(2);
//! let sum = pool
//!     .run_with_timeout("sum", Duration::from_secs(1), || (1..=10).sum::<u32>())
//!     .await?;
//! assert_eq!(sum, 55);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{DiffError, DiffResult};

/// Default width: one slot per drawing in a comparison.
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    /// A pool of at least one worker.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Run `job` on the blocking pool once a slot frees up.
    pub async fn run<F, T>(&self, operation: &str, job: F) -> DiffResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DiffError::external("worker_pool", e).with_operation(operation))?;
        debug!(operation, available = self.permits.available_permits(), "worker slot acquired");
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| DiffError::external("worker_pool", e).with_operation(operation))
    }

    /// As [`run`](Self::run), failing with a retryable `Timeout` once `limit` elapses.
    pub async fn run_with_timeout<F, T>(&self, operation: &str, limit: Duration, job: F) -> DiffResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(limit, self.run(operation, job)).await {
            Ok(result) => result,
            Err(_) => Err(DiffError::timeout(operation, limit.as_millis() as u64).retryable()),
        }
    }

    /// `(available, max)` slots.
    pub fn stats(&self) -> (usize, usize) {
        (self.permits.available_permits(), self.max_workers)
    }
}
