//! Network Infrastructure
//!
//! Framed-message transports for push-feed clients. The crate knows nothing
//! about subscriptions or exchanges: it dials a URL and moves [`Frame`]s.
//!
//! - [`transports::WebSocketConnector`]: production `ws://` / `wss://` dialing
//! - [`transports::MemoryConnector`]: in-process peers for tests and replay
//! - [`time`]: wall-clock helpers shared by the client and adapters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod time;
pub mod transports;

pub use error::{Result, TransportError};
pub use frame::Frame;
pub use time::{safe_duration_to_ns, safe_system_timestamp_ms, safe_system_timestamp_ns};
pub use transports::{
    Connector, DialOutcome, FrameSink, FrameStream, MemoryConnector, MemoryPeer,
    WebSocketConnector,
};

/// Default bound on establishing a transport, in milliseconds
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;
