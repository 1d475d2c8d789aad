//! Normalized market records stored in the rolling caches
//!
//! Adapters map exchange payloads into these shapes; the caches only rely on the
//! [`Timestamped`] and [`Identified`] keys.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cache::{Identified, Timestamped};

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Buyer was the taker
    Buy,
    /// Seller was the taker
    Sell,
}

/// One public trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange trade id
    pub id: String,
    /// Market symbol
    pub symbol: String,
    /// Execution time in milliseconds
    pub timestamp: u64,
    /// Execution price
    pub price: Decimal,
    /// Executed amount
    pub amount: Decimal,
    /// Taker side
    pub side: TradeSide,
}

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start in milliseconds
    pub timestamp: u64,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close (or last) price
    pub close: Decimal,
    /// Base volume
    pub volume: Decimal,
}

impl Timestamped for Candle {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Resting or partially filled
    Open,
    /// Fully filled
    Closed,
    /// Canceled by user or exchange
    Canceled,
    /// Refused by the exchange
    Rejected,
    /// Expired by time in force
    Expired,
}

impl OrderStatus {
    /// True for states that receive no further updates
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

/// Private order update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange order id
    pub id: String,
    /// Client-supplied order id, if any
    pub client_order_id: Option<String>,
    /// Market symbol
    pub symbol: String,
    /// Order side
    pub side: TradeSide,
    /// Limit price (`None` for market orders)
    pub price: Option<Decimal>,
    /// Original amount
    pub amount: Decimal,
    /// Filled amount
    pub filled: Decimal,
    /// Lifecycle state
    pub status: OrderStatus,
    /// Last update time in milliseconds
    pub timestamp: u64,
}

impl Order {
    /// Amount still open
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.filled).max(Decimal::ZERO)
    }
}

impl Identified for Order {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn id(&self) -> &str {
        &self.id
    }
}
