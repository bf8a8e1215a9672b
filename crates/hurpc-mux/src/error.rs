use std::time::Duration;

use hurpc_envelope::EnvelopeError;

/// Error text prefix a responder uses when it has no handler for a method.
pub const METHOD_NOT_FOUND_PREFIX: &str = "method not found: ";

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hurpc_transport::TransportError),

    /// Reading the next envelope failed; the connection is finished.
    #[error("decode failed: {0}")]
    Decode(#[source] EnvelopeError),

    /// Writing an envelope failed (deadline exceeded, broken pipe, ...).
    #[error("write failed: {0}")]
    Write(#[source] EnvelopeError),

    /// No response arrived within the configured timeout.
    #[error("call timed out after {0:?}")]
    CallTimeout(Duration),

    /// The peer has no handler registered for the method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The peer's handler failed; carries its error text verbatim.
    #[error("{0}")]
    Remote(String),

    /// The dispatch loop ended while the call was outstanding.
    #[error("connection closed")]
    Closed,

    /// `run` was called on a multiplexer whose dispatch loop already started.
    #[error("dispatch loop already started")]
    AlreadyRunning,

    /// The configuration cannot be applied to a connection.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MuxError {
    /// Classify error text carried by a completed envelope.
    pub fn from_remote(text: String) -> Self {
        match text.strip_prefix(METHOD_NOT_FOUND_PREFIX) {
            Some(method) => MuxError::MethodNotFound(method.to_string()),
            None => MuxError::Remote(text),
        }
    }

    /// Whether the error was reported by the peer rather than raised locally.
    pub fn is_remote(&self) -> bool {
        matches!(self, MuxError::MethodNotFound(_) | MuxError::Remote(_))
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_found_text_is_recognised() {
        let err = MuxError::from_remote(format!("{METHOD_NOT_FOUND_PREFIX}getRemoteIp"));
        assert!(matches!(err, MuxError::MethodNotFound(ref m) if m == "getRemoteIp"));
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "method not found: getRemoteIp");
    }

    #[test]
    fn other_text_is_verbatim() {
        let err = MuxError::from_remote("boom".to_string());
        assert!(matches!(err, MuxError::Remote(ref text) if text == "boom"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn local_errors_are_not_remote() {
        assert!(!MuxError::Closed.is_remote());
        assert!(!MuxError::CallTimeout(Duration::from_secs(1)).is_remote());
    }
}
