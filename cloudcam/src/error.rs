//! Error types for the operations loop.
//!
//! Every failure the controller can observe is folded into [`OpsError`].
//! Device-level errors never escape the watchdog boundary; they are turned
//! into retry decisions there. The remaining variants decide whether a cycle
//! degrades (calibration, rendering) or scheduling blocks (sun times).

use std::fmt;
use std::time::Duration;

/// Result type for operations-loop calls.
pub type OpsResult<T> = Result<T, OpsError>;

/// Structured context attached to transport and source errors.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation being performed (e.g., "capture", "set_gain")
    pub operation: Option<String>,
    /// Remote endpoint or collaborator involved (e.g., "10.0.0.5:915", "ssGet")
    pub endpoint: Option<String>,
    /// Additional details about the error
    pub details: Option<String>,
    /// Whether a later attempt may succeed
    pub retryable: bool,
}

impl ErrorContext {
    /// Create a new error context with an operation name.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    /// Set the remote endpoint.
    pub fn with_endpoint(mut self, endpoint: impl ToString) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Set additional details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Mark this error as retryable.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref endpoint) = self.endpoint {
            parts.push(format!("endpoint={}", endpoint));
        }
        if let Some(ref details) = self.details {
            parts.push(format!("details={}", details));
        }
        if self.retryable {
            parts.push("retryable=true".to_string());
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Error type for the operations loop.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// An operation exceeded its wall-clock budget.
    #[error("Timeout: {operation} exceeded {budget:?}")]
    Timeout { operation: String, budget: Duration },

    /// Malformed or short response from the camera or shutter channel.
    #[error("Transport error: {message} {context}")]
    Transport {
        message: String,
        context: ErrorContext,
    },

    /// Pointing was requested before any plate solve succeeded.
    #[error("Calibration missing: a plate solve is required before pointing can be computed")]
    CalibrationMissing,

    /// The sun-time source or status sink could not be reached.
    #[error("Source unavailable: {message} {context}")]
    SourceUnavailable {
        message: String,
        context: ErrorContext,
    },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filesystem or socket I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Frame could not be decoded or encoded.
    #[error("Image error: {0}")]
    Image(String),

    /// External plate solver failed or produced an unusable result.
    #[error("Solver error: {0}")]
    Solver(String),

    /// External overlay renderer failed or an asset was missing.
    #[error("Render error: {0}")]
    Render(String),

    /// Shutdown was requested while the operation was waiting.
    #[error("Shutdown requested")]
    Shutdown,

    /// Unexpected internal failure (e.g. a panicking worker task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsError {
    /// Create a transport error with context.
    pub fn transport(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Transport {
            message: message.into(),
            context,
        }
    }

    /// Create a source-unavailable error with context.
    pub fn source_unavailable(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
            context: context.retryable(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Io(_) => true,
            Self::Transport { context, .. } => context.retryable,
            Self::SourceUnavailable { context, .. } => context.retryable,
            _ => false,
        }
    }

    /// Short, stable name used in status strings and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::CalibrationMissing => "calibration_missing",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::Configuration(_) => "configuration",
            Self::Io(_) => "io",
            Self::Image(_) => "image",
            Self::Solver(_) => "solver",
            Self::Render(_) => "render",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<image::ImageError> for OpsError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err.to_string())
    }
}
