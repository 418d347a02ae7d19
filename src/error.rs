//! Error types for the engine
//!
//! One taxonomy crosses every component boundary: validation problems are
//! reported with the offending field, backing-store failures are retryable,
//! capacity overruns tell the caller to resubmit as a task, and cancellation
//! is a clean termination rather than a failure.

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid filter specification or request parameter
    #[error("Validation error on '{field}': {message}")]
    Validation {
        /// Name of the offending field
        field: String,
        /// Description of what is wrong with it
        message: String,
    },

    /// Query execution failure against the columnar snapshot
    #[error("Backing store error: {0}")]
    BackingStore(String),

    /// Result set too large for an interactive call
    #[error("Result set too large for interactive execution: {rows} rows exceed budget of {budget}")]
    Capacity {
        /// Number of rows the filtered set contains
        rows: usize,
        /// The interactive row budget that was exceeded
        budget: usize,
    },

    /// Interactive call ran past its soft wall-clock budget
    #[error("Interactive call exceeded soft timeout: {elapsed_ms}ms over budget of {budget_ms}ms")]
    SoftTimeout {
        /// How long the call had been running when it gave up
        elapsed_ms: u64,
        /// The configured soft budget
        budget_ms: u64,
    },

    /// Operation was cancelled cooperatively; not a failure
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration or snapshot-schema error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error while streaming to a sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error naming the offending field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Machine-readable error kind, stable across releases
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation_error",
            Error::BackingStore(_) => "backing_store_error",
            Error::Capacity { .. } => "capacity_error",
            Error::SoftTimeout { .. } => "timeout_error",
            Error::Cancelled => "cancelled",
            Error::Configuration(_) => "configuration_error",
            Error::Io(_) => "io_error",
        }
    }

    /// Whether the task orchestrator should retry this failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackingStore(_) | Error::Io(_))
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        match e.into_kind() {
            csv::ErrorKind::Io(io) => Error::Io(io),
            other => Error::BackingStore(format!("CSV serialization failed: {:?}", other)),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err = Error::validation("value_range.min", "min exceeds max");
        assert_eq!(err.kind(), "validation_error");
        let display = err.to_string();
        assert!(display.contains("value_range.min"));
        assert!(display.contains("min exceeds max"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::BackingStore("scan failed".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
        assert!(!Error::validation("page", "zero").is_transient());
    }

    #[test]
    fn test_cancelled_is_not_a_failure_kind() {
        assert_eq!(Error::Cancelled.kind(), "cancelled");
    }
}
