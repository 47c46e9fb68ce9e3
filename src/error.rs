//! Error types for feed processing.
//!
//! All errors implement `std::error::Error` and carry enough context to decide
//! whether the caller should retry.
//!
//! ## Error Categories
//!
//! - **Decode Errors**: a frame is structurally invalid (`MalformedFrame`). These are
//!   never fatal: the dispatcher discards the frame and moves on.
//! - **Session Errors**: operations attempted in the wrong state (`NotConnected`,
//!   `UnknownSubscription`) or transport failures (`Connection`, `Timeout`, `Protocol`).
//! - **Persistence Errors**: a configured log directory is missing
//!   (`PersistenceUnavailable`, fatal at construction) or a write failed (`Persistence`).
//! - **Configuration, encoding and replay errors**.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use quakefeed::FeedError;
//!
//! let error = FeedError::connection_failed("broker refused the handshake");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::MessageKind;

/// Result type alias for feed operations.
pub type Result<T, E = FeedError> = std::result::Result<T, E>;

/// Main error type for feed operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FeedError {
    #[error("Malformed {kind} frame: {details}")]
    MalformedFrame { kind: MessageKind, details: String },

    #[error("Cannot {operation}: session is not connected")]
    NotConnected { operation: String },

    #[error("Broker connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Logging directory does not exist: {path}")]
    PersistenceUnavailable { path: PathBuf },

    #[error("Failed to append to {path}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No subscription with id '{id}'")]
    UnknownSubscription { id: String },

    #[error("STOMP protocol violation: {details}")]
    Protocol { details: String },

    #[error("Cannot encode {field}: {details}")]
    Encoding { field: String, details: String },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Corrupt trigger log {path}: {details}")]
    Replay { path: PathBuf, details: String },
}

impl FeedError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Connection { .. } => true,
            FeedError::Timeout { .. } => true,
            FeedError::NotConnected { .. } => true,
            FeedError::Persistence { .. } => true,
            FeedError::MalformedFrame { .. } => false,
            FeedError::PersistenceUnavailable { .. } => false,
            FeedError::UnknownSubscription { .. } => false,
            FeedError::Protocol { .. } => false,
            FeedError::Encoding { .. } => false,
            FeedError::Config { .. } => false,
            FeedError::Replay { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            FeedError::MalformedFrame { .. } => vec![
                "Check the producer's wire format version",
                "Inspect the raw frame in the history buffer",
                "Replay the persisted trigger log to reproduce",
            ],
            FeedError::NotConnected { .. } => vec![
                "Call connect() before subscribing or sending",
                "Re-subscribe known topics after a broker drop",
            ],
            FeedError::Connection { .. } => vec![
                "Ensure the broker is running and reachable",
                "Verify host, port and STOMP credentials",
                "Retry connect() after a short delay",
            ],
            FeedError::Timeout { .. } => vec![
                "Increase the broker timeout",
                "Check network latency to the broker",
                "Retry the operation",
            ],
            FeedError::PersistenceUnavailable { .. } => vec![
                "Create the logging directory before starting",
                "Disable persistence in the configuration",
            ],
            FeedError::Persistence { .. } => vec![
                "Check free disk space",
                "Check write permissions on the logging directory",
            ],
            FeedError::UnknownSubscription { .. } => vec![
                "List active subscriptions before unsubscribing",
                "Use the id given to subscribe()",
            ],
            FeedError::Protocol { .. } => vec![
                "Verify the broker speaks STOMP 1.0-1.2",
                "Check that the port is the STOMP connector, not OpenWire",
            ],
            FeedError::Encoding { .. } => vec![
                "Shorten the field to its fixed wire width",
                "Check numeric values fit their wire type",
            ],
            FeedError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented defaults",
            ],
            FeedError::Replay { .. } => vec![
                "Check the log was not truncated by a crash",
                "Replay only the intact prefix of the file",
            ],
        }
    }

    /// Helper constructor for decode failures.
    pub fn malformed(kind: MessageKind, details: impl Into<String>) -> Self {
        FeedError::MalformedFrame { kind, details: details.into() }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        FeedError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        FeedError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for operations attempted without a live connection.
    pub fn not_connected(operation: impl Into<String>) -> Self {
        FeedError::NotConnected { operation: operation.into() }
    }

    /// Helper constructor for timed out transport operations.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        FeedError::Timeout { operation: operation.into(), duration }
    }

    /// Helper constructor for a missing logging directory.
    pub fn persistence_unavailable(path: impl Into<PathBuf>) -> Self {
        FeedError::PersistenceUnavailable { path: path.into() }
    }

    /// Helper constructor for failed log writes with path context.
    pub fn persistence_error(path: PathBuf, source: std::io::Error) -> Self {
        FeedError::Persistence { path, source }
    }

    /// Helper constructor for STOMP framing errors.
    pub fn protocol(details: impl Into<String>) -> Self {
        FeedError::Protocol { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        FeedError::Config { details: details.into() }
    }
}

// Socket I/O is the only I/O without a path; file I/O is mapped explicitly.
impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::Connection { reason: "transport I/O failed".to_string(), source: Some(Box::new(err)) }
    }
}
