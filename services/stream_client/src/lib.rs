//! # Stream Client
//!
//! Client-side core for push-based exchange feeds: many concurrent callers
//! share one transport per URL, each awaiting the next value for a message
//! hash, while a per-connection task keeps the socket alive.
//!
//! ## Architecture
//!
//! ```text
//! caller ──watch(hash, subscribe)──▶ ConnectionPool ──▶ Connection ──▶ FrameSink
//!    ▲                                                      │
//!    │                                                      ▼
//!    └──── Generation::wait ◀── FutureTable ◀── MessageHandler ◀── supervisor ◀── FrameStream
//! ```
//!
//! - [`future`]: regenerating futures keyed by message hash
//! - [`connection`]: multiplexed connection handle and shared state
//! - `supervisor`: receive loop, keepalive, reconnect with replay
//! - [`pool`]: one connection per URL, shared throttle
//! - [`dispatch`]: ordered message routing for adapters
//! - [`handler`]: the adapter hook trait
//!
//! Adapters implement [`MessageHandler`] and keep their caches and order books
//! in handler state; the receive loop is the only writer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod handler;
pub mod pool;
pub(crate) mod supervisor;
pub mod throttle;

pub use config::{CacheLimits, ClientConfig, GapPolicy, KeepaliveConfig, ReconnectConfig, ThrottleConfig};
pub use connection::{Connection, ConnectionStatus, StatsSnapshot};
pub use dispatch::{DispatchTable, Route};
pub use error::{AdapterError, Result};
pub use future::{FutureTable, Generation, SlotMode};
pub use handler::{MessageContext, MessageHandler};
pub use pool::ConnectionPool;
pub use throttle::SubscribeThrottle;

pub use network::{Connector, Frame, MemoryConnector, MemoryPeer, WebSocketConnector};
