//! Error types for the evaluation relay.
//!
//! The taxonomy separates failures that abort a whole run (the responder
//! never became reachable, the result file could not be written) from
//! failures that only fail a single call (handler errors, timeouts).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the evaluation harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    // Connection-level errors (fatal for the run)
    #[error("Responder at {addr} not reachable within {grace:?}")]
    ConnectionUnavailable { addr: String, grace: Duration },

    #[error("Transport broken: {message}")]
    TransportBroken { message: String },

    // Per-call errors (recorded, run continues)
    #[error("Call to '{endpoint}' timed out after {deadline:?}")]
    Timeout { endpoint: String, deadline: Duration },

    #[error("Handler for '{endpoint}' failed: {message}")]
    HandlerFailure { endpoint: String, message: String },

    #[error("No handler registered for endpoint '{0}'")]
    UnknownEndpoint(String),

    // Wire format errors
    #[error("Corrupt envelope: {message}")]
    CorruptEnvelope { message: String },

    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Dataset errors
    #[error("Dataset error in {path:?}: {message}")]
    Dataset { message: String, path: Option<PathBuf> },

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Wrapped lower-level errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<csv::Error> for HarnessError {
    fn from(err: csv::Error) -> Self {
        HarnessError::Dataset {
            message: err.to_string(),
            path: None,
        }
    }
}

impl HarnessError {
    /// Create a dataset error with path context.
    pub fn dataset(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        HarnessError::Dataset {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Convert to a wire error code carried inside an error envelope.
    ///
    /// Codes follow the JSON-RPC convention the relay wire format borrows:
    /// - -32700: corrupt envelope / parse error
    /// - -32601: endpoint not found
    /// - -32603: internal handler error
    /// - -32000: transport/connectivity error
    pub fn to_wire_error_code(&self) -> i32 {
        match self {
            HarnessError::CorruptEnvelope { .. } | HarnessError::FrameTooLarge { .. } => -32700,
            HarnessError::UnknownEndpoint(_) => -32601,
            HarnessError::HandlerFailure { .. } => -32603,
            HarnessError::ConnectionUnavailable { .. }
            | HarnessError::TransportBroken { .. }
            | HarnessError::Timeout { .. } => -32000,
            _ => -32603,
        }
    }

    /// Whether this error aborts the whole run rather than a single call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::ConnectionUnavailable { .. } | HarnessError::TransportBroken { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::UnknownEndpoint("predict".into());
        assert_eq!(
            err.to_string(),
            "No handler registered for endpoint 'predict'"
        );
    }

    #[test]
    fn test_wire_error_codes() {
        assert_eq!(
            HarnessError::UnknownEndpoint("x".into()).to_wire_error_code(),
            -32601
        );
        assert_eq!(
            HarnessError::CorruptEnvelope {
                message: "bad".into()
            }
            .to_wire_error_code(),
            -32700
        );
        assert_eq!(
            HarnessError::HandlerFailure {
                endpoint: "predict".into(),
                message: "boom".into()
            }
            .to_wire_error_code(),
            -32603
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(HarnessError::TransportBroken {
            message: "reset".into()
        }
        .is_fatal());
        assert!(!HarnessError::Timeout {
            endpoint: "predict".into(),
            deadline: Duration::from_secs(1)
        }
        .is_fatal());
    }
}
