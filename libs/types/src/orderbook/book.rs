use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::side::{validate_levels, BookSide, Level, Side};
use crate::error::BookError;

/// Full book state as delivered by a snapshot message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Bid levels in any order
    pub bids: Vec<Level>,
    /// Ask levels in any order
    pub asks: Vec<Level>,
    /// Exchange timestamp in milliseconds
    pub timestamp: Option<u64>,
    /// Exchange sequence / update id of the snapshot
    pub nonce: Option<u64>,
}

/// Immutable, sorted, depth-limited copy of a book handed to watchers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookView {
    /// Market symbol
    pub symbol: String,
    /// Bids, best (highest) first
    pub bids: Vec<Level>,
    /// Asks, best (lowest) first
    pub asks: Vec<Level>,
    /// Timestamp of the last applied message
    pub timestamp: Option<u64>,
    /// Sequence of the last applied message
    pub nonce: Option<u64>,
}

/// Classification of an incoming update's sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// The book has no sequence yet
    First,
    /// Directly follows the last applied sequence
    InOrder,
    /// Already covered by the book; safe to skip
    Stale,
    /// Updates were missed; the book must be resynchronized
    Gap {
        /// Sequence the book expected next
        expected: u64,
        /// Sequence actually received
        received: u64,
    },
}

/// L2 order book rebuilt from a snapshot and a stream of deltas
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    symbol: String,
    bids: BookSide,
    asks: BookSide,
    timestamp: Option<u64>,
    nonce: Option<u64>,
}

impl OrderBook {
    /// Create an empty book, optionally limited to `depth` levels per side
    pub fn new(symbol: impl Into<String>, depth: Option<usize>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BookSide::new(Side::Bid, depth),
            asks: BookSide::new(Side::Ask, depth),
            timestamp: None,
            nonce: None,
        }
    }

    /// Create a book seeded from a snapshot
    pub fn from_snapshot(
        symbol: impl Into<String>,
        snapshot: BookSnapshot,
        depth: Option<usize>,
    ) -> Result<Self, BookError> {
        let mut book = Self::new(symbol, depth);
        book.reset(snapshot)?;
        Ok(book)
    }

    /// Replace both sides wholesale
    ///
    /// On error the book is left untouched.
    pub fn reset(&mut self, snapshot: BookSnapshot) -> Result<(), BookError> {
        let mut bids = BookSide::new(Side::Bid, self.depth());
        let mut asks = BookSide::new(Side::Ask, self.depth());
        bids.replace(snapshot.bids)?;
        asks.replace(snapshot.asks)?;

        self.bids = bids;
        self.asks = asks;
        self.timestamp = snapshot.timestamp;
        self.nonce = snapshot.nonce;
        Ok(())
    }

    /// Upsert or remove one level
    pub fn store_delta(
        &mut self,
        side: Side,
        price: Decimal,
        amount: Decimal,
    ) -> Result<(), BookError> {
        self.side_mut(side).store(price, amount)
    }

    /// Apply a batch to one side in received order
    pub fn store_deltas<I>(&mut self, side: Side, deltas: I) -> Result<(), BookError>
    where
        I: IntoIterator<Item = Level>,
    {
        self.side_mut(side).store_all(deltas)
    }

    /// Apply one exchange message touching both sides and advance the cursor
    ///
    /// Both batches are validated before either side changes.
    pub fn apply_update(
        &mut self,
        bids: Vec<Level>,
        asks: Vec<Level>,
        timestamp: Option<u64>,
        nonce: Option<u64>,
    ) -> Result<(), BookError> {
        validate_levels(&bids)?;
        validate_levels(&asks)?;
        self.bids.store_all(bids)?;
        self.asks.store_all(asks)?;
        self.set_cursor(timestamp, nonce);
        Ok(())
    }

    /// Record the timestamp and sequence of the last applied message
    pub fn set_cursor(&mut self, timestamp: Option<u64>, nonce: Option<u64>) {
        if timestamp.is_some() {
            self.timestamp = timestamp;
        }
        if nonce.is_some() {
            self.nonce = nonce;
        }
    }

    /// Classify `sequence` against the last applied one
    pub fn check_sequence(&self, sequence: u64) -> SequenceCheck {
        match self.nonce {
            None => SequenceCheck::First,
            Some(last) if sequence <= last => SequenceCheck::Stale,
            Some(last) if sequence == last + 1 => SequenceCheck::InOrder,
            Some(last) => SequenceCheck::Gap {
                expected: last + 1,
                received: sequence,
            },
        }
    }

    /// Sorted copy of at most `n` levels per side
    pub fn limit(&self, n: Option<usize>) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            bids: self.bids.limit(n),
            asks: self.asks.limit(n),
            timestamp: self.timestamp,
            nonce: self.nonce,
        }
    }

    /// Highest bid
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.best()
    }

    /// Lowest ask
    pub fn best_ask(&self) -> Option<Level> {
        self.asks.best()
    }

    /// Market symbol
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Bid side
    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    /// Ask side
    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// Last applied sequence
    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    /// Last applied timestamp
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Drop all levels and the sequence cursor
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.timestamp = None;
        self.nonce = None;
    }

    fn depth(&self) -> Option<usize> {
        self.bids.limit_depth()
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}
