//! Error types for the admission controller
//!
//! Two layers of errors reach the caller of
//! [`AdmissionController::submit`](crate::AdmissionController::submit):
//!
//! - [`AdmissionError`]: raised by the controller itself (backpressure,
//!   queue/execution timeouts, cancellation, panics inside the operation)
//! - the wrapped operation's own error type `E`, passed through untouched
//!
//! [`SubmitError`] joins the two so callers can tell them apart.
//!
//! # Example
//!
//! ```rust,ignore
//! use a3s_bulkhead::{AdmissionError, SubmitError};
//!
//! match controller.submit("dealer-42", "fetch", || fetch_inventory()).await {
//!     Ok(rows) => { /* handle rows */ }
//!     Err(SubmitError::Admission(AdmissionError::BackpressureRejected { .. })) => {
//!         // shed the request, ask the client to retry later
//!     }
//!     Err(SubmitError::Admission(e)) => eprintln!("admission failed: {}", e),
//!     Err(SubmitError::Operation(e)) => eprintln!("operation failed: {}", e),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Controller-originated error
///
/// All variants are terminal: the controller never retries internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The key's queue was full at submission time
    #[error("Backpressure rejected: queue for key '{key}' is full ({queued} waiting)")]
    BackpressureRejected { key: String, queued: usize },

    /// The request waited in the queue past the queue timeout
    #[error("Queue timeout: request for key '{key}' was not started within {timeout:?}")]
    QueueTimeout { key: String, timeout: Duration },

    /// The operation started but did not finish within the execution timeout
    #[error("Execution timeout: operation for key '{key}' exceeded {timeout:?}")]
    ExecutionTimeout { key: String, timeout: Duration },

    /// The key's queue was cleared while the request was waiting
    #[error("Cancelled: queue for key '{key}' was cleared")]
    Cancelled { key: String },

    /// The wrapped operation panicked
    #[error("Operation for key '{key}' panicked")]
    OperationPanicked { key: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Unrecognized priority string
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),
}

impl AdmissionError {
    /// Stable identifier for mapping onto HTTP responses or log fields
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackpressureRejected { .. } => "BACKPRESSURE_REJECTED",
            Self::QueueTimeout { .. } => "QUEUE_TIMEOUT",
            Self::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::OperationPanicked { .. } => "OPERATION_PANICKED",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidPriority(_) => "INVALID_PRIORITY",
        }
    }

    /// Whether the error is a timeout of either kind
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::QueueTimeout { .. } | Self::ExecutionTimeout { .. }
        )
    }
}

/// Error returned by `submit`
///
/// `E` is the wrapped operation's own error type.
#[derive(Error, Debug)]
pub enum SubmitError<E> {
    /// Rejected, timed out or cancelled by the controller
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The operation ran and returned an error
    #[error("{0}")]
    Operation(E),
}

impl<E> SubmitError<E> {
    /// The controller error, if this is one
    pub fn admission(&self) -> Option<&AdmissionError> {
        match self {
            Self::Admission(err) => Some(err),
            Self::Operation(_) => None,
        }
    }

    /// The operation's own error, if this is one
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            Self::Admission(_) => None,
        }
    }

    /// Whether the controller rejected the request for backpressure
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            Self::Admission(AdmissionError::BackpressureRejected { .. })
        )
    }
}

/// Result type alias using AdmissionError
pub type Result<T> = std::result::Result<T, AdmissionError>;
