//! # Configuration Module
//!
//! Pipeline and session settings. Pipeline settings load from TOML; session
//! defaults are plain values owned by the session store.

pub mod config;
pub mod session;

pub use config::{DetectorKind, MaskingConfig, PipelineConfig, RemovalMethod};
pub use session::SessionDefaults;
