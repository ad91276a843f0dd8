//! Error types for the JSON-RPC engine.
//!
//! A single [`Error`] covers local validation failures, transport faults,
//! protocol violations and errors reported by the peer. It is `Clone` so a
//! transport fault can be delivered to every outstanding call at once.

use std::sync::Arc;

use thiserror::Error;

/// JSON-RPC error code used when a peer calls a method nobody handles.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC error code used when an error object carries no usable code.
pub const INTERNAL_ERROR: i64 = -32603;

/// Message substituted when a peer error carries an empty message.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error occurred";

/// Errors produced by the streams, the client and the server.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The outbound document was rejected before any I/O was attempted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream was closed while the operation was pending.
    #[error("The underlying stream was closed")]
    Closed,

    /// The client has failed, is shutting down, or has no streams.
    #[error("No stream available to deliver invocation")]
    NotConnected,

    /// The operation was cancelled.
    #[error("Operation was cancelled")]
    Cancelled,

    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// A frame could not be decoded (bad header or malformed JSON body).
    #[error("Parse error: {0}")]
    Parse(String),

    /// The peer broke the protocol; the connection can no longer be trusted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The peer replied with a JSON-RPC error object.
    #[error("Peer error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<serde_json::Value>,
    },
}

impl Error {
    /// Returns true if this error is the expected result of cancelling a read.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

/// Result type alias for JSON-RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::NotConnected.to_string(),
            "No stream available to deliver invocation"
        );
        assert_eq!(Error::Closed.to_string(), "The underlying stream was closed");

        let remote = Error::Remote {
            code: -32000,
            message: "Database error".to_string(),
            data: None,
        };
        assert_eq!(remote.to_string(), "Peer error -32000: Database error");
    }

    #[test]
    fn test_error_from_io_is_shared_on_clone() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        let copy = err.clone();

        match (err, copy) {
            (Error::Io(a), Error::Io(b)) => {
                assert!(Arc::ptr_eq(&a, &b));
                assert_eq!(a.kind(), std::io::ErrorKind::BrokenPipe);
            }
            other => panic!("Expected Io errors, got {:?}", other),
        }
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Closed.is_cancelled());
    }
}
