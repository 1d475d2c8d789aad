//! Transport Error Types
//!
//! Failures raised while opening, reading or writing a framed-message
//! transport. Callers above the transport only need the message and the
//! variant, so sources are flattened to strings at construction.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        /// Description of the failure
        message: String,
    },

    /// Connection establishment or handshake failure
    #[error("Connection error: {message} (url: {url})")]
    Connection {
        /// Description of the failure
        message: String,
        /// Endpoint that was being opened
        url: String,
    },

    /// Frame could not be encoded or decoded
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the failure
        message: String,
    },

    /// Transport timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// The peer or the local side closed the transport
    #[error("Transport closed: {reason}")]
    Closed {
        /// Close reason, if the peer sent one
        reason: String,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        /// Description of the failure
        message: String,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            url: url.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a closed error
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Network { .. }
                | TransportError::Connection { .. }
                | TransportError::Timeout { .. }
                | TransportError::Closed { .. }
                | TransportError::Io { .. }
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::closed(error.to_string())
            }
            WsError::Io(e) => TransportError::from(e),
            WsError::Protocol(_) | WsError::Utf8 | WsError::Capacity(_) => {
                TransportError::protocol(error.to_string())
            }
            other => TransportError::network(other.to_string()),
        }
    }
}
