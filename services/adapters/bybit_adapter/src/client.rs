//! Typed watch API over a connection pool
//!
//! Public market data and the private order stream live on separate Bybit
//! endpoints; the pool keeps one connection per endpoint and every watch call
//! multiplexes onto it.

use std::sync::Arc;
use tracing::info;

use network::{safe_system_timestamp_ms, Connector, WebSocketConnector};
use stream_client::{AdapterError, ClientConfig, ConnectionPool, Result, StatsSnapshot};
use types::{BookView, Candle, Order, Trade};

use crate::config::BybitConfig;
use crate::handler::{
    ohlcv_hash, ohlcv_topic, order_book_hash, order_book_topic, orders_hash, trades_hash,
    trades_topic, BybitHandler, StreamUpdate, AUTH_HASH, ORDER_TOPIC,
};
use crate::messages::BybitSubscribeRequest;
use crate::signing::auth_request;

/// Order book depths offered by the public stream
pub const ORDER_BOOK_DEPTHS: [u32; 4] = [1, 50, 200, 500];

/// Depth used when the caller gives no limit
pub const DEFAULT_ORDER_BOOK_DEPTH: u32 = 50;

/// Kline intervals offered by the public stream
pub const KLINE_INTERVALS: [&str; 13] = [
    "1", "3", "5", "15", "30", "60", "120", "240", "360", "720", "D", "W", "M",
];

/// Streaming client for Bybit v5
pub struct BybitClient {
    config: BybitConfig,
    pool: ConnectionPool<BybitHandler>,
}

impl BybitClient {
    /// Client dialing the real exchange
    pub fn new(config: BybitConfig, client: ClientConfig) -> Result<Self> {
        Self::with_connector(config, client, Arc::new(WebSocketConnector::new()))
    }

    /// Client dialing through `connector`
    pub fn with_connector(
        config: BybitConfig,
        client: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate().map_err(AdapterError::Configuration)?;
        client.validate().map_err(AdapterError::Configuration)?;

        let limits = client.caches.clone();
        let gap_policy = client.gap_policy;
        let pool = ConnectionPool::new(client, connector, move |_url: &str| {
            BybitHandler::new(limits.clone(), gap_policy)
        });

        info!(
            public_url = %config.public_url(),
            private_url = %config.private_url(),
            "Bybit client ready"
        );
        Ok(Self { config, pool })
    }

    /// Adapter configuration
    pub fn config(&self) -> &BybitConfig {
        &self.config
    }

    /// Next order book state for `symbol`
    ///
    /// `limit` picks the subscription depth and must be one of
    /// [`ORDER_BOOK_DEPTHS`]; `None` uses [`DEFAULT_ORDER_BOOK_DEPTH`].
    pub async fn watch_order_book(&self, symbol: &str, limit: Option<usize>) -> Result<Arc<BookView>> {
        let depth = match limit {
            None => DEFAULT_ORDER_BOOK_DEPTH,
            Some(n) => ORDER_BOOK_DEPTHS
                .into_iter()
                .find(|&d| d as usize == n)
                .ok_or_else(|| {
                    AdapterError::NotSupported(format!(
                        "order book depth {n}; expected one of {ORDER_BOOK_DEPTHS:?}"
                    ))
                })?,
        };

        let topic = order_book_topic(symbol, depth);
        let update = self
            .pool
            .watch(
                &self.config.public_url(),
                &order_book_hash(symbol, depth),
                BybitSubscribeRequest::subscribe(&topic).into(),
                &topic,
                false,
            )
            .await?;

        match update {
            StreamUpdate::OrderBook(view) => Ok(trim_view(view, depth as usize)),
            other => Err(unexpected("order book", &other)),
        }
    }

    /// Trades of `symbol` received since the previous delivery
    pub async fn watch_trades(&self, symbol: &str) -> Result<Vec<Trade>> {
        let topic = trades_topic(symbol);
        let update = self
            .pool
            .watch(
                &self.config.public_url(),
                &trades_hash(symbol),
                BybitSubscribeRequest::subscribe(&topic).into(),
                &topic,
                false,
            )
            .await?;

        match update {
            StreamUpdate::Trades(trades) => Ok(trades),
            other => Err(unexpected("trades", &other)),
        }
    }

    /// Candle history of `symbol` at `interval` after the latest update
    pub async fn watch_ohlcv(&self, symbol: &str, interval: &str) -> Result<Vec<Candle>> {
        if !KLINE_INTERVALS.contains(&interval) {
            return Err(AdapterError::NotSupported(format!(
                "kline interval {interval}"
            )));
        }

        let topic = ohlcv_topic(symbol, interval);
        let update = self
            .pool
            .watch(
                &self.config.public_url(),
                &ohlcv_hash(symbol, interval),
                BybitSubscribeRequest::subscribe(&topic).into(),
                &topic,
                true,
            )
            .await?;

        match update {
            StreamUpdate::Candles(candles) => Ok(candles),
            other => Err(unexpected("candles", &other)),
        }
    }

    /// Authenticate the private connection
    ///
    /// Runs the signed handshake once per connection; later calls return
    /// immediately until the connection drops.
    pub async fn authenticate(&self) -> Result<()> {
        let (api_key, secret) = self.config.credentials()?;
        let expires = safe_system_timestamp_ms() + self.config.auth_expiry_ms;

        match self
            .pool
            .authenticate(
                &self.config.private_url(),
                AUTH_HASH,
                auth_request(api_key, secret, expires),
            )
            .await?
        {
            StreamUpdate::Authenticated => Ok(()),
            other => Err(unexpected("auth", &other)),
        }
    }

    /// Orders of the account, optionally only those of `symbol`
    pub async fn watch_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        self.authenticate().await?;

        let update = self
            .pool
            .watch(
                &self.config.private_url(),
                &orders_hash(symbol),
                BybitSubscribeRequest::subscribe(ORDER_TOPIC).into(),
                ORDER_TOPIC,
                true,
            )
            .await?;

        match update {
            StreamUpdate::Orders(orders) => Ok(orders),
            other => Err(unexpected("orders", &other)),
        }
    }

    /// Counters of the connection to `url`, if one exists
    pub fn stats(&self, url: &str) -> Option<StatsSnapshot> {
        self.pool.get(url).map(|connection| connection.stats())
    }

    /// Underlying pool
    pub fn pool(&self) -> &ConnectionPool<BybitHandler> {
        &self.pool
    }

    /// Close every connection
    pub async fn close(&self) {
        self.pool.close_all().await;
    }
}

fn trim_view(view: Arc<BookView>, limit: usize) -> Arc<BookView> {
    if view.bids.len() <= limit && view.asks.len() <= limit {
        return view;
    }
    let mut trimmed = (*view).clone();
    trimmed.bids.truncate(limit);
    trimmed.asks.truncate(limit);
    Arc::new(trimmed)
}

fn unexpected(expected: &str, got: &StreamUpdate) -> AdapterError {
    AdapterError::Internal(format!("expected {expected} update, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::Level;

    #[test]
    fn test_trim_view() {
        let view = Arc::new(BookView {
            symbol: "BTCUSDT".into(),
            bids: vec![Level::new(dec!(2), dec!(1)), Level::new(dec!(1), dec!(1))],
            asks: vec![Level::new(dec!(3), dec!(1))],
            timestamp: None,
            nonce: Some(7),
        });

        let same = trim_view(view.clone(), 2);
        assert!(Arc::ptr_eq(&same, &view));

        let trimmed = trim_view(view, 1);
        assert_eq!(trimmed.bids, vec![Level::new(dec!(2), dec!(1))]);
        assert_eq!(trimmed.nonce, Some(7));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = BybitConfig {
            category: "futures".into(),
            ..Default::default()
        };
        let result = BybitClient::with_connector(
            config,
            ClientConfig::default(),
            Arc::new(network::MemoryConnector::new()),
        );
        assert!(matches!(result, Err(AdapterError::Configuration(_))));
    }
}
