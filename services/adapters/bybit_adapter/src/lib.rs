//! # Bybit Adapter
//!
//! Bybit v5 WebSocket adapter built on `stream-client`.
//!
//! - Public stream: `orderbook.{depth}.{symbol}` snapshot/delta books with
//!   update-id gap detection, `publicTrade.{symbol}` tape and
//!   `kline.{interval}.{symbol}` candles
//! - Private stream: HMAC-signed `auth` handshake and the `order` topic
//! - Application-level `{"op":"ping"}` keepalive on both
//!
//! [`BybitClient`] is the entry point; [`BybitHandler`] is the per-connection
//! [`stream_client::MessageHandler`] and can be fed captured frames directly.

pub mod client;
pub mod config;
pub mod handler;
pub mod messages;
pub mod signing;

pub use client::{BybitClient, DEFAULT_ORDER_BOOK_DEPTH, KLINE_INTERVALS, ORDER_BOOK_DEPTHS};
pub use config::BybitConfig;
pub use handler::{BybitHandler, BybitState, StreamUpdate};
