//! Error types for streaming clients

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Main error type for client and adapter operations
///
/// `Clone` because one failure settles every waiter of a generation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdapterError {
    /// Transport send/receive failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Socket closed by the peer or by `close()`
    #[error("Connection closed for {url}: {reason:?}")]
    ConnectionClosed {
        /// Endpoint whose connection closed
        url: String,
        /// Close reason, if known
        reason: Option<String>,
    },

    /// Authentication handshake explicitly rejected
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed {
        /// Exchange-provided reason
        reason: String,
    },

    /// No response or keepalive within the deadline
    #[error("Request timeout: {operation} exceeded {timeout_ms}ms")]
    RequestTimeout {
        /// What was being waited for
        operation: String,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Malformed or inconsistent exchange data
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Adapter declines an operation
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Configuration error in client settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reconnection gave up
    #[error("Maximum reconnection attempts ({max_attempts}) exceeded for {url}")]
    MaxReconnectAttemptsExceeded {
        /// Endpoint that failed to reconnect
        url: String,
        /// Maximum attempts that were tried
        max_attempts: u32,
    },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Check if this error is recoverable through retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AdapterError::ConnectionError(_)
                | AdapterError::ConnectionClosed { .. }
                | AdapterError::RequestTimeout { .. }
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AdapterError::AuthenticationFailed { .. }
                | AdapterError::Configuration(_)
                | AdapterError::MaxReconnectAttemptsExceeded { .. }
                | AdapterError::NotSupported(_)
        )
    }
}

impl From<network::TransportError> for AdapterError {
    fn from(error: network::TransportError) -> Self {
        match error {
            network::TransportError::Timeout {
                operation,
                timeout_ms,
            } => AdapterError::RequestTimeout {
                operation,
                timeout_ms,
            },
            other => AdapterError::ConnectionError(other.to_string()),
        }
    }
}

impl From<types::BookError> for AdapterError {
    fn from(error: types::BookError) -> Self {
        AdapterError::ProtocolError(error.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(error: serde_json::Error) -> Self {
        AdapterError::ProtocolError(format!("Failed to parse JSON: {error}"))
    }
}
