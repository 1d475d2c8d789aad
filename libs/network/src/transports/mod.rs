//! Framed Transport Layer
//!
//! A [`Connector`] opens one duplex framed-message channel to a URL and hands
//! back its two halves. Connection supervision (reconnects, keepalive,
//! subscription replay) lives above this layer; a connector only knows how to
//! dial.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::{Frame, Result, TransportError};

pub mod memory;
pub mod websocket;

pub use memory::{DialOutcome, MemoryConnector, MemoryPeer};
pub use websocket::WebSocketConnector;

/// Outbound half of an open transport
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of an open transport; ends when the peer goes away
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Opens framed-message transports
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial `url` and return the write and read halves
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream)>;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// True if the transport answers inbound pings by itself
    ///
    /// Supervisors only write their own pong when this is false.
    fn answers_pings(&self) -> bool {
        false
    }
}
