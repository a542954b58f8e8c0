//! # Error Taxonomy for the Comparison Pipeline
//!
//! Every failure the pipeline can surface is a [`DiffError`]. Each variant
//! carries an [`ErrorContext`] with the operation, timestamp, severity, a
//! recovery suggestion and the retry/recover flags the orchestrator consults
//! when it decides whether to degrade or abort.
//!
//! ## Failure Classes
//!
//! | Variant | Class | Pipeline policy |
//! |---------|-------|-----------------|
//! | `DetectionFailed` | collaborator | degrade to an empty mask, warn |
//! | `LoadFailed` | input | fatal for that input, names it |
//! | `DimensionMismatch` | contract | fail fast |
//! | `AlignmentInsufficient` | collaborator | fall back to baseline resize |
//! | `Timeout` | collaborator | degrade (detection) or fail retryably (upscale) |
//! | `Validation` | contract | fail fast |
//! | `Network` | collaborator | retried with backoff, then the summary fails |
//!
//! Aspect-ratio drift is not an error; see
//! [`AspectWarning`](crate::core::AspectWarning).
//!
//! ## Usage
//!
//! ```rust
//! use archidiff::error::{DiffError, Retryable};
//!
//! let error = DiffError::timeout("upscale", 120_000)
//!     .with_context("upscaling comparison drawing")
//!     .with_recovery_suggestion("Retry the comparison or raise timeouts.upscale_ms");
//!
//! assert!(error.is_retryable());
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Degraded but usable result
    Warning,
    Error,
    /// The comparison request cannot complete
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    pub context: Option<String>,
    pub recovery_suggestion: Option<String>,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub recoverable: bool,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            retryable: false,
            recoverable: false,
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Which of the two drawings in a comparison an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    Reference,
    Comparison,
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRole::Reference => write!(f, "reference"),
            InputRole::Comparison => write!(f, "comparison"),
        }
    }
}

/// Base error type for the comparison pipeline
#[derive(Debug)]
pub enum DiffError {
    /// The annotation detector errored or returned unusable regions
    DetectionFailed {
        detector: String,
        reason: String,
        context: ErrorContext,
    },
    /// A source document or raster could not be decoded
    LoadFailed {
        input: String,
        role: Option<InputRole>,
        reason: String,
        context: ErrorContext,
    },
    /// Two rasters that must share a grid do not
    DimensionMismatch {
        operation: String,
        left: (u32, u32),
        right: (u32, u32),
        context: ErrorContext,
    },
    /// Feature matching found too few correspondences to register the pair
    AlignmentInsufficient {
        found: usize,
        required: usize,
        context: ErrorContext,
    },
    /// A collaborator call exceeded its time budget
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// Parameter outside its documented range
    Validation {
        field: String,
        constraint: String,
        value: String,
        context: ErrorContext,
    },
    /// Configuration file could not be read or parsed
    Config {
        path: Option<String>,
        reason: String,
        context: ErrorContext,
    },
    /// Operation not permitted in the current session state
    State {
        current_state: String,
        attempted_operation: String,
        reason: String,
        context: ErrorContext,
    },
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// Image encode/decode failure from the `image` crate
    Image {
        operation: String,
        source: image::ImageError,
        context: ErrorContext,
    },
    /// A remote service could not be reached or answered with a transient failure
    Network {
        operation: String,
        address: Option<String>,
        source: Option<Box<dyn StdError + Send + Sync>>,
        context: ErrorContext,
    },
    /// External library errors
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl DiffError {
    pub fn detection_failed(detector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DetectionFailed {
            detector: detector.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Warning),
        }
        .recoverable()
    }

    pub fn load_failed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            input: input.into(),
            role: None,
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    pub fn dimension_mismatch(operation: impl Into<String>, left: (u32, u32), right: (u32, u32)) -> Self {
        Self::DimensionMismatch {
            operation: operation.into(),
            left,
            right,
            context: ErrorContext::new(),
        }
        .with_recovery_suggestion("Normalize the pair onto a common grid before compositing or scoring")
    }

    pub fn alignment_insufficient(found: usize, required: usize) -> Self {
        Self::AlignmentInsufficient {
            found,
            required,
            context: ErrorContext::new().with_severity(ErrorSeverity::Warning),
        }
        .recoverable()
        .with_recovery_suggestion("Fall back to baseline resize normalization")
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
            context: ErrorContext::new(),
        }
    }

    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn config(path: Option<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            path,
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn image(operation: impl Into<String>, source: image::ImageError) -> Self {
        Self::Image {
            operation: operation.into(),
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn network(operation: impl Into<String>, address: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            address: Some(address.into()),
            source: None,
            context: ErrorContext::new(),
        }
    }

    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Wrap an error reported by a pluggable collaborator.
    pub fn collaborator(name: impl Into<String>, error: anyhow::Error) -> Self {
        Self::External {
            library: name.into(),
            source: error.into(),
            context: ErrorContext::new(),
        }
    }

    /// Attach the path an I/O error refers to.
    pub fn with_path(mut self, p: impl Into<String>) -> Self {
        if let Self::Io { path, .. } = &mut self {
            *path = Some(p.into());
        }
        self
    }

    /// Attach the underlying cause of a network failure.
    pub fn with_source(mut self, cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        if let Self::Network { source, .. } = &mut self {
            *source = Some(cause.into());
        }
        self
    }

    /// Tag a load failure with which side of the comparison it came from.
    pub fn with_role(mut self, r: InputRole) -> Self {
        if let Self::LoadFailed { role, .. } = &mut self {
            *role = Some(r);
        }
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.context_mut().retryable = true;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.context_mut().recoverable = true;
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::DetectionFailed { context, .. }
            | Self::LoadFailed { context, .. }
            | Self::DimensionMismatch { context, .. }
            | Self::AlignmentInsufficient { context, .. }
            | Self::Timeout { context, .. }
            | Self::Validation { context, .. }
            | Self::Config { context, .. }
            | Self::State { context, .. }
            | Self::Io { context, .. }
            | Self::Image { context, .. }
            | Self::Network { context, .. }
            | Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::DetectionFailed { context, .. }
            | Self::LoadFailed { context, .. }
            | Self::DimensionMismatch { context, .. }
            | Self::AlignmentInsufficient { context, .. }
            | Self::Timeout { context, .. }
            | Self::Validation { context, .. }
            | Self::Config { context, .. }
            | Self::State { context, .. }
            | Self::Io { context, .. }
            | Self::Image { context, .. }
            | Self::Network { context, .. }
            | Self::External { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::DetectionFailed { .. } => "detection_failed",
            Self::LoadFailed { .. } => "load_failed",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::AlignmentInsufficient { .. } => "alignment_insufficient",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation",
            Self::Config { .. } => "config",
            Self::State { .. } => "state",
            Self::Io { .. } => "io",
            Self::Image { .. } => "image",
            Self::Network { .. } => "network",
            Self::External { .. } => "external",
        }
    }
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::DetectionFailed { detector, reason, .. } => {
                write!(f, "Annotation detection failed in {}: {}", detector, reason)
            }
            DiffError::LoadFailed {
                input, role, reason, ..
            } => match role {
                Some(role) => write!(f, "Failed to load {} input '{}': {}", role, input, reason),
                None => write!(f, "Failed to load '{}': {}", input, reason),
            },
            DiffError::DimensionMismatch {
                operation,
                left,
                right,
                ..
            } => write!(
                f,
                "{} requires equal dimensions, got {}x{} and {}x{}",
                operation, left.0, left.1, right.0, right.1
            ),
            DiffError::AlignmentInsufficient { found, required, .. } => write!(
                f,
                "Auto-alignment found {} good matches, at least {} required",
                found, required
            ),
            DiffError::Timeout {
                operation,
                duration_ms,
                ..
            } => write!(f, "Timeout during {} after {}ms", operation, duration_ms),
            DiffError::Validation {
                field,
                constraint,
                value,
                ..
            } => write!(
                f,
                "Validation failed for '{}': {} (value: {})",
                field, constraint, value
            ),
            DiffError::Config { path, reason, .. } => match path {
                Some(path) => write!(f, "Configuration error in '{}': {}", path, reason),
                None => write!(f, "Configuration error: {}", reason),
            },
            DiffError::State {
                current_state,
                attempted_operation,
                reason,
                ..
            } => write!(
                f,
                "Cannot {} while {}: {}",
                attempted_operation, current_state, reason
            ),
            DiffError::Io {
                operation,
                path,
                source,
                ..
            } => match path {
                Some(path) => write!(f, "I/O error during {} on '{}': {}", operation, path, source),
                None => write!(f, "I/O error during {}: {}", operation, source),
            },
            DiffError::Image {
                operation, source, ..
            } => write!(f, "Image error during {}: {}", operation, source),
            DiffError::Network {
                operation,
                address,
                source,
                ..
            } => {
                write!(f, "Network error during {}", operation)?;
                if let Some(address) = address {
                    write!(f, " on {}", address)?;
                }
                match source {
                    Some(source) => write!(f, ": {}", source),
                    None => Ok(()),
                }
            }
            DiffError::External {
                library, source, ..
            } => write!(f, "External library error in {}: {}", library, source),
        }
    }
}

impl StdError for DiffError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Image { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            Self::Network {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using the pipeline error type
pub type DiffResult<T> = Result<T, DiffError>;

/// Trait for errors that can be retried
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> Option<u64> {
        None
    }

    fn max_retries(&self) -> Option<usize> {
        None
    }
}

impl Retryable for DiffError {
    fn is_retryable(&self) -> bool {
        self.context().retryable
            || matches!(
                self,
                Self::Timeout { .. } | Self::Network { .. } | Self::Io { .. }
            )
    }

    fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout { .. } => Some(1000),
            Self::Network { .. } => Some(2000),
            Self::Io { .. } => Some(100),
            _ => None,
        }
    }

    fn max_retries(&self) -> Option<usize> {
        match self {
            Self::Timeout { .. } => Some(3),
            Self::Network { .. } => Some(5),
            Self::Io { .. } => Some(3),
            _ => None,
        }
    }
}

/// Errors the pipeline can step around with a fallback
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for DiffError {
    fn is_recoverable(&self) -> bool {
        self.context().recoverable
    }
}

pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for DiffError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for DiffError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if an error is transient (may resolve itself)
    pub fn is_transient(error: &DiffError) -> bool {
        matches!(error, DiffError::Timeout { .. } | DiffError::Network { .. })
    }
}

impl From<std::io::Error> for DiffError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<image::ImageError> for DiffError {
    fn from(error: image::ImageError) -> Self {
        Self::image("unknown", error)
    }
}

impl From<serde_json::Error> for DiffError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

impl From<archidiff_scale::cpu::ScaleError> for DiffError {
    fn from(error: archidiff_scale::cpu::ScaleError) -> Self {
        Self::external("archidiff_scale", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = DiffError::validation("opacity", "must be within 0.0..=1.0", "1.5");
        assert_eq!(error.category(), "validation");
        assert!(!error.is_retryable());
        assert!(!error.is_recoverable());
        assert!(!classify::is_transient(&error));
    }

    #[test]
    fn test_detection_failure_degrades() {
        let error = DiffError::detection_failed("regions", "polygon with 2 vertices");
        assert!(error.is_recoverable());
        assert_eq!(error.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let error = DiffError::timeout("upscale", 5000);
        assert!(error.is_retryable());
        assert_eq!(error.retry_delay_ms(), Some(1000));
        assert_eq!(error.max_retries(), Some(3));
        assert!(classify::is_transient(&error));
    }

    #[test]
    fn test_load_failed_names_input() {
        let error = DiffError::load_failed("b.pdf", "not a PDF").with_role(InputRole::Comparison);
        assert_eq!(error.severity(), ErrorSeverity::Fatal);
        assert_eq!(
            error.to_string(),
            "Failed to load comparison input 'b.pdf': not a PDF"
        );
    }

    #[test]
    fn test_alignment_insufficient_falls_back() {
        let error = DiffError::alignment_insufficient(4, 10);
        assert!(error.is_recoverable());
        assert_eq!(
            error.recovery_suggestion(),
            Some("Fall back to baseline resize normalization")
        );
    }

    #[test]
    fn test_network_failure_names_address_and_cause() {
        let error = DiffError::network("generate_content", "http://127.0.0.1:9")
            .with_source("503 Service Unavailable".to_string());
        assert!(error.is_retryable());
        assert!(classify::is_transient(&error));
        assert_eq!(error.retry_delay_ms(), Some(2000));
        assert_eq!(error.max_retries(), Some(5));
        assert_eq!(
            error.to_string(),
            "Network error during generate_content on http://127.0.0.1:9: 503 Service Unavailable"
        );
        assert!(StdError::source(&error).is_some());
    }
}
