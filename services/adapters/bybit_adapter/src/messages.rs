//! Bybit wire-format messages and their conversion into market records
//!
//! These map directly to the JSON sent by Bybit's v5 public and private
//! streams and are converted into the normalized `types` records before they
//! reach a cache or order book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use network::Frame;
use stream_client::{AdapterError, Result};
use types::{parse_decimal, BookError, Candle, Level, Order, OrderStatus, Trade, TradeSide};

/// Top-level WebSocket envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitWsResponse {
    /// Topic name (e.g., "orderbook.50.BTCUSDT")
    pub topic: Option<String>,
    /// Message type: "snapshot" or "delta"
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    /// Operation field for subscribe/auth/pong responses
    pub op: Option<String>,
    /// Whether an operation succeeded
    pub success: Option<bool>,
    /// Error or status text of an operation response
    pub ret_msg: Option<String>,
    /// Echo of the request's `req_id`
    pub req_id: Option<String>,
    /// Server timestamp in milliseconds
    pub ts: Option<u64>,
}

impl BybitWsResponse {
    /// True for `snapshot` messages
    pub fn is_snapshot(&self) -> bool {
        self.msg_type.as_deref() == Some("snapshot")
    }

    /// True for ping replies on either stream
    ///
    /// The public stream answers `{"op":"ping","ret_msg":"pong"}`, the private
    /// stream `{"op":"pong"}`.
    pub fn is_pong(&self) -> bool {
        match self.op.as_deref() {
            Some("pong") => true,
            Some("ping") => self.ret_msg.as_deref() == Some("pong"),
            _ => false,
        }
    }
}

/// Orderbook data from a snapshot or delta message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitOrderbook {
    /// Symbol name (e.g., "BTCUSDT")
    pub s: String,
    /// Bid levels as `[price, qty]` string pairs
    pub b: Vec<[String; 2]>,
    /// Ask levels as `[price, qty]` string pairs
    pub a: Vec<[String; 2]>,
    /// Update ID, consecutive within one subscription
    pub u: u64,
    /// Cross sequence
    pub seq: u64,
}

impl BybitOrderbook {
    /// Parsed bid and ask levels; qty "0" marks a removal
    pub fn levels(&self) -> std::result::Result<(Vec<Level>, Vec<Level>), BookError> {
        let parse = |levels: &[[String; 2]]| {
            levels
                .iter()
                .map(|[price, qty]| Level::parse(price, qty))
                .collect::<std::result::Result<Vec<_>, _>>()
        };
        Ok((parse(&self.b)?, parse(&self.a)?))
    }
}

/// Public trade entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitTrade {
    /// Trade timestamp in milliseconds
    #[serde(rename = "T")]
    pub timestamp: u64,
    /// Symbol name
    pub s: String,
    /// Side: "Buy" or "Sell"
    #[serde(rename = "S")]
    pub side: String,
    /// Quantity
    pub v: String,
    /// Price
    pub p: String,
    /// Trade ID
    pub i: String,
}

impl TryFrom<&BybitTrade> for Trade {
    type Error = AdapterError;

    fn try_from(bt: &BybitTrade) -> Result<Self> {
        Ok(Trade {
            id: bt.i.clone(),
            symbol: bt.s.clone(),
            timestamp: bt.timestamp,
            price: parse_decimal(&bt.p)?,
            amount: parse_decimal(&bt.v)?,
            side: parse_side(&bt.side)?,
        })
    }
}

/// Kline (candle) entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitKline {
    /// Bucket start in milliseconds
    pub start: u64,
    /// Bucket end in milliseconds
    pub end: u64,
    /// Interval code (e.g., "1", "60", "D")
    pub interval: String,
    /// Open price
    pub open: String,
    /// Close price
    pub close: String,
    /// High price
    pub high: String,
    /// Low price
    pub low: String,
    /// Base volume
    pub volume: String,
    /// True once the bucket is closed
    #[serde(default)]
    pub confirm: bool,
}

impl TryFrom<&BybitKline> for Candle {
    type Error = AdapterError;

    fn try_from(k: &BybitKline) -> Result<Self> {
        Ok(Candle {
            timestamp: k.start,
            open: parse_decimal(&k.open)?,
            high: parse_decimal(&k.high)?,
            low: parse_decimal(&k.low)?,
            close: parse_decimal(&k.close)?,
            volume: parse_decimal(&k.volume)?,
        })
    }
}

/// Private order update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitOrder {
    /// Exchange order id
    pub order_id: String,
    /// Client order id, empty when unset
    #[serde(default)]
    pub order_link_id: String,
    /// Symbol name
    pub symbol: String,
    /// Side: "Buy" or "Sell"
    pub side: String,
    /// Limit price, "0" or empty for market orders
    #[serde(default)]
    pub price: String,
    /// Order quantity
    pub qty: String,
    /// Filled quantity
    #[serde(default)]
    pub cum_exec_qty: String,
    /// Bybit order status
    pub order_status: String,
    /// Last update time in milliseconds, as a string
    pub updated_time: String,
}

impl TryFrom<&BybitOrder> for Order {
    type Error = AdapterError;

    fn try_from(o: &BybitOrder) -> Result<Self> {
        let price = match o.price.as_str() {
            "" => None,
            p => Some(parse_decimal(p)?).filter(|p| !p.is_zero()),
        };
        let filled = match o.cum_exec_qty.as_str() {
            "" => Decimal::ZERO,
            q => parse_decimal(q)?,
        };
        let timestamp = o.updated_time.parse().map_err(|_| {
            AdapterError::ProtocolError(format!("Invalid order timestamp: {}", o.updated_time))
        })?;

        Ok(Order {
            id: o.order_id.clone(),
            client_order_id: Some(o.order_link_id.clone()).filter(|id| !id.is_empty()),
            symbol: o.symbol.clone(),
            side: parse_side(&o.side)?,
            price,
            amount: parse_decimal(&o.qty)?,
            filled,
            status: parse_order_status(&o.order_status)?,
            timestamp,
        })
    }
}

fn parse_side(side: &str) -> Result<TradeSide> {
    match side {
        "Buy" => Ok(TradeSide::Buy),
        "Sell" => Ok(TradeSide::Sell),
        other => Err(AdapterError::ProtocolError(format!("Unknown side: {other}"))),
    }
}

fn parse_order_status(status: &str) -> Result<OrderStatus> {
    match status {
        "New" | "PartiallyFilled" | "Untriggered" | "Triggered" | "Created" => Ok(OrderStatus::Open),
        "Filled" => Ok(OrderStatus::Closed),
        "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => Ok(OrderStatus::Canceled),
        "Rejected" => Ok(OrderStatus::Rejected),
        other => Err(AdapterError::ProtocolError(format!(
            "Unknown order status: {other}"
        ))),
    }
}

/// Subscribe/unsubscribe request; `req_id` carries the topic so a failure
/// response can be attributed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitSubscribeRequest {
    /// Request id echoed in the response
    pub req_id: String,
    /// Operation: "subscribe" or "unsubscribe"
    pub op: String,
    /// Topics
    pub args: Vec<String>,
}

impl BybitSubscribeRequest {
    /// Subscribe to one topic
    pub fn subscribe(topic: &str) -> Self {
        Self {
            req_id: topic.to_string(),
            op: "subscribe".to_string(),
            args: vec![topic.to_string()],
        }
    }

    /// Unsubscribe from one topic
    pub fn unsubscribe(topic: &str) -> Self {
        Self {
            req_id: topic.to_string(),
            op: "unsubscribe".to_string(),
            args: vec![topic.to_string()],
        }
    }
}

impl From<BybitSubscribeRequest> for Frame {
    fn from(request: BybitSubscribeRequest) -> Self {
        Frame::from(json!(request))
    }
}

/// Application-level ping
pub fn ping_request() -> Frame {
    Frame::from(json!({ "op": "ping" }))
}
