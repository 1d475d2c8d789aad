//! # Order Book Reconstruction
//!
//! Snapshot + delta engine. A book is seeded by [`OrderBook::reset`] from a full
//! snapshot and then mutated in place by [`OrderBook::store_delta`] /
//! [`OrderBook::store_deltas`]. Readers take an immutable [`BookView`] through
//! [`OrderBook::limit`], which never touches stored state.
//!
//! Feeds with per-level order counts or per-order (L3) entries use
//! [`CountedBookSide`] and [`IndexedBookSide`].
//!
//! Prices are keyed on their normalized [`Decimal`](rust_decimal::Decimal), so
//! `"100"`, `"100.0"` and `"1e2"` land on the same level.

mod book;
mod side;
mod variants;

pub use book::{BookSnapshot, BookView, OrderBook, SequenceCheck};
pub use side::{parse_decimal, BookSide, Level, Levels, Side};
pub use variants::{CountedBookSide, CountedLevel, IndexedBookSide, IndexedLevel};
