//! Error types for compositing and workflow operations

use crate::workflow::WorkflowStage;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for studio operations
pub type Result<T> = std::result::Result<T, StudioError>;

/// Error taxonomy shared by the pixel pipeline and the workflow orchestrator
#[derive(Error, Debug)]
pub enum StudioError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Raw bytes could not be interpreted as an image
    #[error("Decode error: {0}")]
    Decode(String),

    /// An assumption about the input shape was violated
    #[error("Format error: {0}")]
    Format(String),

    /// An external call failed, returned a malformed payload, or timed out
    #[error("Service failure ({service}): {message}")]
    ServiceFailure {
        /// Name of the collaborator that failed
        service: String,
        /// Failure details
        message: String,
    },

    /// Failure recorded against a single batch item
    #[error("Item '{item}' failed during {stage}: {cause}")]
    BatchItemFailure {
        /// Item name as uploaded
        item: String,
        /// Stage the failure was recorded in
        stage: WorkflowStage,
        /// Underlying cause
        #[source]
        cause: Arc<StudioError>,
    },

    /// A stage could not start for the whole batch
    #[error("Stage setup error: {0}")]
    StageSetup(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not permitted in the current workflow state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Work was cancelled through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StudioError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    /// Create a new service failure for the named collaborator
    pub fn service<N: Into<String>, S: Into<String>>(service: N, msg: S) -> Self {
        Self::ServiceFailure {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Create a new stage setup error
    pub fn stage_setup<S: Into<String>>(msg: S) -> Self {
        Self::StageSetup(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap a cause as a per-item failure
    pub fn item_failure<S: Into<String>>(item: S, stage: WorkflowStage, cause: StudioError) -> Self {
        Self::BatchItemFailure {
            item: item.into(),
            stage,
            cause: Arc::new(cause),
        }
    }

    /// Map an HTTP client error to a service failure
    pub fn network_error(service: &str, error: &reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("request timed out: {}", error)
        } else if error.is_decode() {
            format!("malformed response body: {}", error)
        } else {
            error.to_string()
        };
        Self::service(service, message)
    }

    /// Map an image decoding error with context
    pub fn image_decode_error(context: &str, error: &image::ImageError) -> Self {
        Self::Decode(format!("{}: {}", context, error))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// The innermost cause, unwrapping batch item failures
    #[must_use]
    pub fn root_cause(&self) -> &StudioError {
        match self {
            Self::BatchItemFailure { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Whether this error is a per-item failure
    #[must_use]
    pub fn is_item_failure(&self) -> bool {
        matches!(self, Self::BatchItemFailure { .. })
    }
}
