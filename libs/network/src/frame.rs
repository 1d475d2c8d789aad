//! Framed messages exchanged with a push-feed endpoint

use bytes::Bytes;

/// One message on a framed transport
///
/// Mirrors WebSocket message kinds without tying callers to a WebSocket
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 payload, the usual carrier for JSON feeds
    Text(String),
    /// Opaque binary payload
    Binary(Bytes),
    /// Transport-level ping with payload
    Ping(Vec<u8>),
    /// Transport-level pong with payload
    Pong(Vec<u8>),
    /// Close notification with optional reason
    Close(Option<String>),
}

impl Frame {
    /// Build a text frame
    pub fn text(payload: impl Into<String>) -> Self {
        Frame::Text(payload.into())
    }

    /// Text payload, if this is a text frame
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Payload bytes for data frames (text or binary)
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(text) => Some(text.as_bytes()),
            Frame::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// True for transport control frames (ping, pong, close)
    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_))
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Frame {
    fn from(value: serde_json::Value) -> Self {
        Frame::Text(value.to_string())
    }
}
