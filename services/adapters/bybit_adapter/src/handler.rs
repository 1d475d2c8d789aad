//! Receive-loop processing for Bybit v5 streams
//!
//! One [`BybitHandler`] per connection. Operation responses (`pong`,
//! `subscribe`, `auth`) are handled inline; data messages are routed by topic
//! through a [`DispatchTable`] into the order books and caches owned by
//! [`BybitState`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use network::Frame;
use stream_client::{
    AdapterError, CacheLimits, DispatchTable, GapPolicy, MessageContext, MessageHandler, Result,
};
use types::{
    ArrayCache, BookSnapshot, BookView, Candle, IdentityCache, Order, OrderBook, SequenceCheck,
    TimestampCache, Trade,
};

use crate::messages::{
    ping_request, BybitKline, BybitOrder, BybitOrderbook, BybitSubscribeRequest, BybitTrade,
    BybitWsResponse,
};

/// Message hash of the private stream's auth handshake
pub const AUTH_HASH: &str = "authenticated";

/// Private topic carrying order updates
pub const ORDER_TOPIC: &str = "order";

/// Value delivered to callers waiting on a Bybit connection
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// Order book after the latest applied message
    OrderBook(Arc<BookView>),
    /// Trades received since the previous delivery
    Trades(Vec<Trade>),
    /// Candle history of one symbol and interval
    Candles(Vec<Candle>),
    /// Orders of the account stream
    Orders(Vec<Order>),
    /// Auth handshake accepted
    Authenticated,
}

/// Message hash of an order book watch
pub fn order_book_hash(symbol: &str, depth: u32) -> String {
    format!("orderbook:{symbol}:{depth}")
}

/// Order book topic
pub fn order_book_topic(symbol: &str, depth: u32) -> String {
    format!("orderbook.{depth}.{symbol}")
}

/// Message hash of a trade watch
pub fn trades_hash(symbol: &str) -> String {
    format!("trades:{symbol}")
}

/// Trade topic
pub fn trades_topic(symbol: &str) -> String {
    format!("publicTrade.{symbol}")
}

/// Message hash of a candle watch
pub fn ohlcv_hash(symbol: &str, interval: &str) -> String {
    format!("ohlcv:{symbol}:{interval}")
}

/// Candle topic
pub fn ohlcv_topic(symbol: &str, interval: &str) -> String {
    format!("kline.{interval}.{symbol}")
}

/// Message hash of an order watch, optionally narrowed to one symbol
pub fn orders_hash(symbol: Option<&str>) -> String {
    match symbol {
        Some(symbol) => format!("orders:{symbol}"),
        None => "orders".to_string(),
    }
}

/// Message hash served by a subscription topic
///
/// Used to attribute a failed subscribe response to its waiters.
pub fn hash_for_topic(topic: &str) -> Option<String> {
    let parts: Vec<&str> = topic.split('.').collect();
    match parts.as_slice() {
        ["orderbook", depth, symbol] => {
            depth.parse().ok().map(|depth| order_book_hash(symbol, depth))
        }
        ["publicTrade", symbol] => Some(trades_hash(symbol)),
        ["kline", interval, symbol] => Some(ohlcv_hash(symbol, interval)),
        [ORDER_TOPIC] => Some(orders_hash(None)),
        _ => None,
    }
}

/// Books and caches owned by one connection
#[derive(Debug)]
pub struct BybitState {
    limits: CacheLimits,
    gap_policy: GapPolicy,
    books: HashMap<String, OrderBook>,
    trades: HashMap<String, ArrayCache<Trade>>,
    candles: HashMap<(String, String), TimestampCache<Candle>>,
    orders: IdentityCache<Order>,
}

impl BybitState {
    /// Empty state using the given cache sizes and gap policy
    pub fn new(limits: CacheLimits, gap_policy: GapPolicy) -> Self {
        Self {
            orders: IdentityCache::new(limits.orders),
            limits,
            gap_policy,
            books: HashMap::new(),
            trades: HashMap::new(),
            candles: HashMap::new(),
        }
    }

    /// Book for a topic, if a snapshot has been applied
    pub fn book(&self, topic: &str) -> Option<&OrderBook> {
        self.books.get(topic)
    }

    /// Stored orders
    pub fn orders(&self) -> &IdentityCache<Order> {
        &self.orders
    }

    fn handle_order_book(
        &mut self,
        ctx: &mut MessageContext<'_, StreamUpdate>,
        message: &Value,
    ) -> Result<()> {
        let envelope: BybitWsResponse = serde_json::from_value(message.clone())?;
        let topic = envelope.topic.clone().unwrap_or_default();
        let data: BybitOrderbook = data_field(message)?;
        let depth = topic
            .split('.')
            .nth(1)
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| AdapterError::ProtocolError(format!("Bad order book topic: {topic}")))?;
        let hash = order_book_hash(&data.s, depth);

        if let Err(e) = self.apply_book_message(ctx, &topic, &envelope, &data) {
            // Bad levels poison only this book. Only a subscribe brings a new
            // snapshot, so resubscribe to rebuild it.
            warn!(topic = %topic, error = %e, "Order book rejected, resubscribing");
            self.books.remove(&topic);
            ctx.reject(&hash, e.clone());
            ctx.reply(BybitSubscribeRequest::unsubscribe(&topic).into());
            ctx.reply(BybitSubscribeRequest::subscribe(&topic).into());
            return Err(e);
        }

        if let Some(book) = self.books.get(&topic) {
            ctx.resolve(&hash, StreamUpdate::OrderBook(Arc::new(book.limit(None))));
        }
        Ok(())
    }

    fn apply_book_message(
        &mut self,
        ctx: &mut MessageContext<'_, StreamUpdate>,
        topic: &str,
        envelope: &BybitWsResponse,
        data: &BybitOrderbook,
    ) -> Result<()> {
        let (bids, asks) = data.levels()?;

        if envelope.is_snapshot() {
            let depth = self.limits.order_book_depth;
            let book = self
                .books
                .entry(topic.to_string())
                .or_insert_with(|| OrderBook::new(data.s.clone(), depth));
            book.reset(BookSnapshot {
                bids,
                asks,
                timestamp: envelope.ts,
                nonce: Some(data.u),
            })?;
            return Ok(());
        }

        let Some(book) = self.books.get_mut(topic) else {
            debug!(topic, update_id = data.u, "Delta before snapshot, ignoring");
            return Ok(());
        };

        match book.check_sequence(data.u) {
            SequenceCheck::First => {
                debug!(topic, update_id = data.u, "Delta before snapshot, ignoring");
            }
            SequenceCheck::Stale => {
                debug!(topic, update_id = data.u, "Stale delta skipped");
            }
            SequenceCheck::InOrder => {
                book.apply_update(bids, asks, envelope.ts, Some(data.u))?;
            }
            SequenceCheck::Gap { expected, received } => match self.gap_policy {
                GapPolicy::Resync => {
                    warn!(topic, expected, received, "Order book gap, resubscribing");
                    self.books.remove(topic);
                    ctx.reply(BybitSubscribeRequest::unsubscribe(topic).into());
                    ctx.reply(BybitSubscribeRequest::subscribe(topic).into());
                }
                GapPolicy::Warn => {
                    warn!(topic, expected, received, "Order book gap, applying anyway");
                    book.apply_update(bids, asks, envelope.ts, Some(data.u))?;
                }
            },
        }
        Ok(())
    }

    fn handle_trades(
        &mut self,
        ctx: &mut MessageContext<'_, StreamUpdate>,
        message: &Value,
    ) -> Result<()> {
        let raw: Vec<BybitTrade> = data_field(message)?;
        let trades = raw
            .iter()
            .map(Trade::try_from)
            .collect::<Result<Vec<_>>>()?;

        let capacity = self.limits.trades;
        let mut touched: Vec<String> = Vec::new();
        for trade in trades {
            if !touched.contains(&trade.symbol) {
                touched.push(trade.symbol.clone());
            }
            self.trades
                .entry(trade.symbol.clone())
                .or_insert_with(|| ArrayCache::new(capacity))
                .append(trade);
        }

        for symbol in touched {
            if let Some(cache) = self.trades.get_mut(&symbol) {
                let fresh = cache.recent(cache.new_updates());
                // Keep counting until someone actually receives the batch.
                if ctx.resolve(&trades_hash(&symbol), StreamUpdate::Trades(fresh)) {
                    cache.take_new_updates();
                }
            }
        }
        Ok(())
    }

    fn handle_kline(
        &mut self,
        ctx: &mut MessageContext<'_, StreamUpdate>,
        message: &Value,
    ) -> Result<()> {
        let topic = message["topic"].as_str().unwrap_or_default();
        let symbol = topic
            .rsplit('.')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AdapterError::ProtocolError(format!("Bad kline topic: {topic}")))?
            .to_string();
        let raw: Vec<BybitKline> = data_field(message)?;

        let capacity = self.limits.ohlcv;
        let mut touched: Vec<String> = Vec::new();
        for kline in &raw {
            let candle = Candle::try_from(kline)?;
            let cache = self
                .candles
                .entry((symbol.clone(), kline.interval.clone()))
                .or_insert_with(|| TimestampCache::new(capacity));
            if !cache.append(candle) {
                debug!(symbol = %symbol, interval = %kline.interval, start = kline.start, "Out-of-order candle dropped");
            } else if !touched.contains(&kline.interval) {
                touched.push(kline.interval.clone());
            }
        }

        for interval in touched {
            if let Some(cache) = self.candles.get(&(symbol.clone(), interval.clone())) {
                ctx.resolve(
                    &ohlcv_hash(&symbol, &interval),
                    StreamUpdate::Candles(cache.to_vec()),
                );
            }
        }
        Ok(())
    }

    fn handle_orders(
        &mut self,
        ctx: &mut MessageContext<'_, StreamUpdate>,
        message: &Value,
    ) -> Result<()> {
        let raw: Vec<BybitOrder> = data_field(message)?;
        let orders = raw
            .iter()
            .map(Order::try_from)
            .collect::<Result<Vec<_>>>()?;

        let mut symbols: Vec<String> = Vec::new();
        for order in orders {
            if !symbols.contains(&order.symbol) {
                symbols.push(order.symbol.clone());
            }
            self.orders.append(order);
        }

        for symbol in &symbols {
            let for_symbol: Vec<Order> = self.orders.for_symbol(symbol).cloned().collect();
            ctx.resolve(
                &orders_hash(Some(symbol)),
                StreamUpdate::Orders(for_symbol),
            );
        }
        ctx.resolve(&orders_hash(None), StreamUpdate::Orders(self.orders.to_vec()));
        Ok(())
    }
}

fn data_field<T: DeserializeOwned>(message: &Value) -> Result<T> {
    Ok(T::deserialize(&message["data"])?)
}

fn build_table() -> DispatchTable<BybitState, StreamUpdate> {
    DispatchTable::<BybitState, StreamUpdate>::new()
        .exact(ORDER_TOPIC, |state, ctx, msg| state.handle_orders(ctx, msg))
        .prefix("orderbook.", |state, ctx, msg| state.handle_order_book(ctx, msg))
        .prefix("publicTrade.", |state, ctx, msg| state.handle_trades(ctx, msg))
        .prefix("kline.", |state, ctx, msg| state.handle_kline(ctx, msg))
}

/// [`MessageHandler`] for one Bybit public or private connection
pub struct BybitHandler {
    table: DispatchTable<BybitState, StreamUpdate>,
    state: BybitState,
}

impl BybitHandler {
    /// Handler with empty books and caches
    pub fn new(limits: CacheLimits, gap_policy: GapPolicy) -> Self {
        Self {
            table: build_table(),
            state: BybitState::new(limits, gap_policy),
        }
    }

    /// Books and caches
    pub fn state(&self) -> &BybitState {
        &self.state
    }

    fn handle_operation(
        &mut self,
        ctx: &mut MessageContext<'_, StreamUpdate>,
        response: &BybitWsResponse,
    ) -> Result<()> {
        if response.is_pong() {
            ctx.record_pong();
            return Ok(());
        }

        let success = response.success.unwrap_or(false);
        let reason = response.ret_msg.clone().unwrap_or_default();

        match response.op.as_deref() {
            Some("auth") if success => {
                info!(url = ctx.url(), "Authenticated");
                ctx.resolve(AUTH_HASH, StreamUpdate::Authenticated);
            }
            Some("auth") => {
                warn!(url = ctx.url(), reason = %reason, "Authentication rejected");
                ctx.forget_subscription(ORDER_TOPIC);
                ctx.reject(AUTH_HASH, AdapterError::AuthenticationFailed { reason });
            }
            Some("subscribe") if !success => {
                let topic = response.req_id.clone().unwrap_or_default();
                warn!(url = ctx.url(), topic = %topic, reason = %reason, "Subscription rejected");
                ctx.forget_subscription(&topic);
                if let Some(hash) = hash_for_topic(&topic) {
                    ctx.reject(
                        &hash,
                        AdapterError::ProtocolError(format!(
                            "subscribe {topic} rejected: {reason}"
                        )),
                    );
                }
            }
            Some(op) => debug!(op, success, "Operation response"),
            None => {}
        }
        Ok(())
    }
}

impl MessageHandler for BybitHandler {
    type Value = StreamUpdate;

    fn handle_message(
        &mut self,
        ctx: &mut MessageContext<'_, StreamUpdate>,
        frame: &Frame,
    ) -> Result<()> {
        let Some(payload) = frame.payload() else {
            return Ok(());
        };
        let message: Value = serde_json::from_slice(payload)?;

        if let Some(topic) = message["topic"].as_str() {
            let topic = topic.to_string();
            if !self.table.dispatch(&topic, &mut self.state, ctx, &message)? {
                debug!(topic = %topic, "No route for topic");
            }
            return Ok(());
        }

        if message.get("op").is_some() {
            let response: BybitWsResponse = serde_json::from_value(message)?;
            return self.handle_operation(ctx, &response);
        }

        debug!("Unrecognized message");
        Ok(())
    }

    fn ping(&mut self) -> Option<Frame> {
        Some(ping_request())
    }

    fn on_open(&mut self, _ctx: &mut MessageContext<'_, StreamUpdate>) {
        // Replayed subscriptions start with a fresh snapshot.
        self.state.books.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use stream_client::{ClientConfig, Connection};
    use types::Level;

    fn handler() -> BybitHandler {
        BybitHandler::new(CacheLimits::default(), GapPolicy::Resync)
    }

    fn detached() -> Connection<StreamUpdate> {
        Connection::detached("mem://bybit", Arc::new(ClientConfig::default()))
    }

    fn book_msg(kind: &str, u: u64, bids: Value, asks: Value) -> Frame {
        Frame::from(json!({
            "topic": "orderbook.50.BTCUSDT",
            "type": kind,
            "ts": 1_700_000_000_000u64 + u,
            "data": { "s": "BTCUSDT", "b": bids, "a": asks, "u": u, "seq": u * 10 }
        }))
    }

    #[test]
    fn test_hash_for_topic() {
        assert_eq!(hash_for_topic("orderbook.50.BTCUSDT").as_deref(), Some("orderbook:BTCUSDT:50"));
        assert_eq!(hash_for_topic("publicTrade.ETHUSDT").as_deref(), Some("trades:ETHUSDT"));
        assert_eq!(hash_for_topic("kline.60.BTCUSDT").as_deref(), Some("ohlcv:BTCUSDT:60"));
        assert_eq!(hash_for_topic("order").as_deref(), Some("orders"));
        assert_eq!(hash_for_topic("tickers.BTCUSDT"), None);
    }

    #[test]
    fn test_snapshot_then_delta() {
        let conn = detached();
        let mut h = handler();
        let waiter = conn.future(&order_book_hash("BTCUSDT", 50));

        conn.feed(
            &mut h,
            &book_msg("snapshot", 100, json!([["100", "1"], ["99", "2"]]), json!([["101", "1"]])),
        )
        .unwrap();
        match waiter.peek() {
            Some(Ok(StreamUpdate::OrderBook(view))) => {
                assert_eq!(view.bids.len(), 2);
                assert_eq!(view.nonce, Some(100));
            }
            other => panic!("unexpected {other:?}"),
        }

        conn.feed(&mut h, &book_msg("delta", 101, json!([["100", "0"]]), json!([])))
            .unwrap();
        let book = h.state().book("orderbook.50.BTCUSDT").unwrap();
        assert_eq!(book.best_bid(), Some(Level::new(dec!(99), dec!(2))));
        assert_eq!(book.nonce(), Some(101));
    }

    #[test]
    fn test_stale_delta_ignored() {
        let conn = detached();
        let mut h = handler();
        conn.feed(&mut h, &book_msg("snapshot", 100, json!([["100", "1"]]), json!([])))
            .unwrap();
        conn.feed(&mut h, &book_msg("delta", 100, json!([["100", "5"]]), json!([])))
            .unwrap();

        let book = h.state().book("orderbook.50.BTCUSDT").unwrap();
        assert_eq!(book.best_bid(), Some(Level::new(dec!(100), dec!(1))));
    }

    #[test]
    fn test_gap_resubscribes() {
        let conn = detached();
        let mut h = handler();
        conn.feed(&mut h, &book_msg("snapshot", 100, json!([["100", "1"]]), json!([])))
            .unwrap();
        let replies = conn
            .feed(&mut h, &book_msg("delta", 105, json!([["100", "5"]]), json!([])))
            .unwrap();

        assert!(h.state().book("orderbook.50.BTCUSDT").is_none());
        let ops: Vec<Value> = replies
            .iter()
            .map(|f| serde_json::from_str(f.as_text().unwrap()).unwrap())
            .collect();
        assert_eq!(ops[0]["op"], "unsubscribe");
        assert_eq!(ops[1]["op"], "subscribe");
        assert_eq!(ops[1]["args"][0], "orderbook.50.BTCUSDT");
    }

    #[test]
    fn test_gap_warn_policy_applies() {
        let conn = detached();
        let mut h = BybitHandler::new(CacheLimits::default(), GapPolicy::Warn);
        conn.feed(&mut h, &book_msg("snapshot", 100, json!([["100", "1"]]), json!([])))
            .unwrap();
        let replies = conn
            .feed(&mut h, &book_msg("delta", 105, json!([["100", "5"]]), json!([])))
            .unwrap();

        assert!(replies.is_empty());
        let book = h.state().book("orderbook.50.BTCUSDT").unwrap();
        assert_eq!(book.best_bid(), Some(Level::new(dec!(100), dec!(5))));
        assert_eq!(book.nonce(), Some(105));
    }

    #[test]
    fn test_negative_amount_rejects_book_waiters() {
        let conn = detached();
        let mut h = handler();
        conn.feed(&mut h, &book_msg("snapshot", 100, json!([["100", "1"]]), json!([])))
            .unwrap();
        let waiter = conn.future(&order_book_hash("BTCUSDT", 50));

        let result = conn.feed(&mut h, &book_msg("delta", 101, json!([["100", "-1"]]), json!([])));
        assert!(matches!(result, Err(AdapterError::ProtocolError(_))));
        assert!(matches!(waiter.peek(), Some(Err(AdapterError::ProtocolError(_)))));
        assert!(h.state().book("orderbook.50.BTCUSDT").is_none());
    }

    #[test]
    fn test_trades_delivered_once() {
        let conn = detached();
        let mut h = handler();
        let trade = |id: &str| {
            json!({"T": 1, "s": "BTCUSDT", "S": "Buy", "v": "1", "p": "100", "i": id})
        };
        let msg = |ids: &[&str]| {
            Frame::from(json!({
                "topic": "publicTrade.BTCUSDT",
                "type": "snapshot",
                "data": ids.iter().map(|id| trade(id)).collect::<Vec<_>>(),
            }))
        };

        // Nobody waiting: the trades accumulate.
        conn.feed(&mut h, &msg(&["a", "b"])).unwrap();
        let waiter = conn.future(&trades_hash("BTCUSDT"));
        conn.feed(&mut h, &msg(&["c"])).unwrap();

        match waiter.peek() {
            Some(Ok(StreamUpdate::Trades(trades))) => {
                let ids: Vec<&str> = trades.iter().map(|t| t.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let next = conn.future(&trades_hash("BTCUSDT"));
        conn.feed(&mut h, &msg(&["d"])).unwrap();
        match next.peek() {
            Some(Ok(StreamUpdate::Trades(trades))) => assert_eq!(trades.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_kline_updates_bucket_in_place() {
        let conn = detached();
        let mut h = handler();
        let kline = |start: u64, close: &str| {
            Frame::from(json!({
                "topic": "kline.1.BTCUSDT",
                "type": "snapshot",
                "data": [{
                    "start": start, "end": start + 59_999, "interval": "1",
                    "open": "100", "close": close, "high": "110", "low": "90",
                    "volume": "5", "turnover": "500", "confirm": false, "timestamp": start + 1
                }]
            }))
        };

        conn.feed(&mut h, &kline(60_000, "101")).unwrap();
        conn.feed(&mut h, &kline(60_000, "102")).unwrap();
        let waiter = conn.future(&ohlcv_hash("BTCUSDT", "1"));
        conn.feed(&mut h, &kline(120_000, "103")).unwrap();

        match waiter.peek() {
            Some(Ok(StreamUpdate::Candles(candles))) => {
                assert_eq!(candles.len(), 2);
                assert_eq!(candles[0].close, dec!(102));
                assert_eq!(candles[1].timestamp, 120_000);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Stale bucket: nothing to deliver.
        let stale = conn.future(&ohlcv_hash("BTCUSDT", "1"));
        conn.feed(&mut h, &kline(0, "1")).unwrap();
        assert!(stale.peek().is_none());
    }

    #[test]
    fn test_pong_and_auth_responses() {
        let conn = detached();
        let mut h = handler();
        let auth = conn.future(AUTH_HASH);

        conn.feed(&mut h, &Frame::from(json!({"op": "pong", "args": ["1"]})))
            .unwrap();
        conn.feed(
            &mut h,
            &Frame::from(json!({"op": "auth", "success": true, "ret_msg": "", "conn_id": "c"})),
        )
        .unwrap();
        assert_eq!(auth.peek(), Some(Ok(StreamUpdate::Authenticated)));
    }

    #[test]
    fn test_auth_failure() {
        let conn = detached();
        let mut h = handler();
        let auth = conn.future(AUTH_HASH);

        conn.feed(
            &mut h,
            &Frame::from(json!({"op": "auth", "success": false, "ret_msg": "Invalid sign"})),
        )
        .unwrap();
        assert_eq!(
            auth.peek(),
            Some(Err(AdapterError::AuthenticationFailed {
                reason: "Invalid sign".to_string()
            }))
        );
    }

    #[test]
    fn test_orders_by_identity() {
        let conn = detached();
        let mut h = handler();
        let order = |status: &str, filled: &str| {
            Frame::from(json!({
                "topic": "order",
                "id": "x",
                "creationTime": 1,
                "data": [{
                    "orderId": "o-1", "orderLinkId": "", "symbol": "ETHUSDT", "side": "Buy",
                    "price": "1800", "qty": "2", "cumExecQty": filled,
                    "orderStatus": status, "updatedTime": "10"
                }]
            }))
        };

        conn.feed(&mut h, &order("New", "0")).unwrap();
        let all = conn.future(&orders_hash(None));
        let eth = conn.future(&orders_hash(Some("ETHUSDT")));
        conn.feed(&mut h, &order("Filled", "2")).unwrap();

        for waiter in [all, eth] {
            match waiter.peek() {
                Some(Ok(StreamUpdate::Orders(orders))) => {
                    assert_eq!(orders.len(), 1);
                    assert_eq!(orders[0].status, types::OrderStatus::Closed);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(h.state().orders().len(), 1);
    }

    #[test]
    fn test_unparseable_frame_is_error() {
        let conn = detached();
        let mut h = handler();
        assert!(conn.feed(&mut h, &Frame::text("not json")).is_err());
        assert!(conn
            .feed(&mut h, &Frame::text(r#"{"topic":"publicTrade.X","data":"oops"}"#))
            .is_err());
    }
}
