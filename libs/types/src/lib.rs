//! # Streaming Market Data Types
//!
//! ## Purpose
//!
//! Memory-bounded structures that exchange adapters mutate from inside a
//! connection's receive loop and hand to waiting callers:
//!
//! - [`cache`]: fixed-capacity rolling caches for trades, candles and orders
//! - [`orderbook`]: snapshot + delta order book reconstruction
//! - [`market`]: the normalized records stored in those caches
//!
//! ## Ownership Model
//!
//! Nothing in this crate is async or synchronized. Every structure is owned by
//! exactly one connection; waiters receive cloned views ([`BookView`],
//! `Vec<Trade>`, ...) so a resolution never exposes state that a later frame is
//! still mutating.
//!
//! ## Examples
//!
//! ```rust
//! use rust_decimal_macros::dec;
//! use types::{BookSnapshot, Level, OrderBook, Side};
//!
//! let mut book = OrderBook::new("BTC/USDT", None);
//! book.reset(BookSnapshot {
//!     bids: vec![Level::new(dec!(100), dec!(1)), Level::new(dec!(99), dec!(2))],
//!     asks: vec![Level::new(dec!(101), dec!(1))],
//!     timestamp: None,
//!     nonce: None,
//! })?;
//!
//! book.store_delta(Side::Bid, dec!(100), dec!(0))?;
//! assert_eq!(book.limit(Some(10)).bids, vec![Level::new(dec!(99), dec!(2))]);
//! # Ok::<(), types::BookError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod market;
pub mod orderbook;

pub use cache::{
    ArrayCache, IdentityCache, Identified, TimestampCache, Timestamped, DEFAULT_CACHE_CAPACITY,
};
pub use error::BookError;
pub use market::{Candle, Order, OrderStatus, Trade, TradeSide};
pub use orderbook::{
    parse_decimal, BookSide, BookSnapshot, BookView, CountedBookSide, CountedLevel,
    IndexedBookSide, IndexedLevel, Level, OrderBook, SequenceCheck, Side,
};
