//! Bybit adapter against a scripted in-memory exchange

use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use bybit_adapter::{BybitClient, BybitConfig};
use network::{MemoryConnector, MemoryPeer, TransportError};
use stream_client::{AdapterError, ClientConfig, ConnectionStatus};
use types::{Level, OrderStatus};

const PUBLIC: &str = "mem://bybit/public";
const PRIVATE: &str = "mem://bybit/private";

fn client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.connect_timeout_ms = 500;
    config.reconnect.base_backoff_ms = 10;
    config.reconnect.max_backoff_ms = 40;
    config.throttle.subscribes_per_second = 1_000;
    config.throttle.burst = 100;
    config
}

fn bybit_config() -> BybitConfig {
    BybitConfig {
        public_url: Some(PUBLIC.to_string()),
        private_url: Some(PRIVATE.to_string()),
        api_key: Some("test-key".to_string()),
        api_secret: Some("test-secret".to_string()),
        ..Default::default()
    }
}

fn setup(config: ClientConfig) -> (Arc<BybitClient>, MemoryConnector) {
    let connector = MemoryConnector::new();
    let client = BybitClient::with_connector(bybit_config(), config, Arc::new(connector.clone()))
        .unwrap();
    (Arc::new(client), connector)
}

async fn accept(connector: &MemoryConnector) -> MemoryPeer {
    connector
        .accept_timeout(Duration::from_secs(2))
        .await
        .expect("client never dialed")
}

async fn next_json(peer: &mut MemoryPeer) -> Value {
    tokio::time::timeout(Duration::from_secs(2), peer.recv_json())
        .await
        .expect("timed out waiting for client frame")
        .expect("client hung up")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn book(symbol: &str, kind: &str, u: u64, bids: Value, asks: Value) -> Value {
    json!({
        "topic": format!("orderbook.50.{symbol}"),
        "type": kind,
        "ts": 1_700_000_000_000u64 + u,
        "data": { "s": symbol, "b": bids, "a": asks, "u": u, "seq": u },
        "cts": 1_700_000_000_000u64
    })
}

fn watch_book(
    client: &Arc<BybitClient>,
    symbol: &'static str,
) -> tokio::task::JoinHandle<stream_client::Result<Arc<types::BookView>>> {
    let client = client.clone();
    tokio::spawn(async move { client.watch_order_book(symbol, None).await })
}

#[tokio::test]
async fn test_concurrent_book_watchers_see_snapshot_then_delta() {
    let (client, connector) = setup(client_config());

    let watchers: Vec<_> = (0..3).map(|_| watch_book(&client, "BTCUSDT")).collect();
    let mut peer = accept(&connector).await;
    let subscribe = next_json(&mut peer).await;
    assert_eq!(subscribe["op"], "subscribe");
    assert_eq!(subscribe["args"], json!(["orderbook.50.BTCUSDT"]));
    settle().await;

    peer.send_json(&book(
        "BTCUSDT",
        "snapshot",
        100,
        json!([["100", "1"], ["99", "2"]]),
        json!([["101", "3"]]),
    ));
    for watcher in watchers {
        let view = watcher.await.unwrap().unwrap();
        assert_eq!(view.bids[0], Level::new(dec!(100), dec!(1)));
        assert_eq!(view.asks[0], Level::new(dec!(101), dec!(3)));
    }

    let watchers: Vec<_> = (0..3).map(|_| watch_book(&client, "BTCUSDT")).collect();
    settle().await;
    peer.send_json(&book("BTCUSDT", "delta", 101, json!([["100", "0"]]), json!([])));
    for watcher in watchers {
        let view = watcher.await.unwrap().unwrap();
        assert_eq!(view.bids, vec![Level::new(dec!(99), dec!(2))]);
        assert_eq!(view.nonce, Some(101));
    }

    // Six watch calls, one subscribe.
    assert!(peer.try_recv().is_none());
}

#[tokio::test]
async fn test_gap_resubscribes_and_waits_for_new_snapshot() {
    let (client, connector) = setup(client_config());

    let watcher = watch_book(&client, "BTCUSDT");
    let mut peer = accept(&connector).await;
    next_json(&mut peer).await;
    peer.send_json(&book("BTCUSDT", "snapshot", 100, json!([["100", "1"]]), json!([])));
    watcher.await.unwrap().unwrap();

    let watcher = watch_book(&client, "BTCUSDT");
    settle().await;
    peer.send_json(&book("BTCUSDT", "delta", 104, json!([["100", "9"]]), json!([])));

    let unsubscribe = next_json(&mut peer).await;
    let resubscribe = next_json(&mut peer).await;
    assert_eq!(unsubscribe["op"], "unsubscribe");
    assert_eq!(resubscribe["op"], "subscribe");
    assert_eq!(resubscribe["args"], json!(["orderbook.50.BTCUSDT"]));
    assert!(!watcher.is_finished());

    peer.send_json(&book("BTCUSDT", "snapshot", 200, json!([["98", "4"]]), json!([])));
    let view = watcher.await.unwrap().unwrap();
    assert_eq!(view.bids, vec![Level::new(dec!(98), dec!(4))]);
    assert_eq!(view.nonce, Some(200));
}

#[tokio::test]
async fn test_bad_delta_fails_only_that_symbol() {
    let (client, connector) = setup(client_config());

    let btc = watch_book(&client, "BTCUSDT");
    let mut peer = accept(&connector).await;
    next_json(&mut peer).await;
    let eth = watch_book(&client, "ETHUSDT");
    next_json(&mut peer).await;

    peer.send_json(&book("BTCUSDT", "snapshot", 1, json!([["100", "1"]]), json!([])));
    peer.send_json(&book("ETHUSDT", "snapshot", 1, json!([["10", "1"]]), json!([])));
    btc.await.unwrap().unwrap();
    eth.await.unwrap().unwrap();

    let btc = watch_book(&client, "BTCUSDT");
    let eth = watch_book(&client, "ETHUSDT");
    settle().await;
    peer.send_json(&book("BTCUSDT", "delta", 2, json!([["100", "-5"]]), json!([])));
    peer.send_json(&book("ETHUSDT", "delta", 2, json!([["10", "2"]]), json!([])));

    assert!(matches!(
        btc.await.unwrap(),
        Err(AdapterError::ProtocolError(_))
    ));
    let view = eth.await.unwrap().unwrap();
    assert_eq!(view.bids, vec![Level::new(dec!(10), dec!(2))]);

    let stats = client.stats(PUBLIC).unwrap();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(
        client.pool().get(PUBLIC).unwrap().status(),
        ConnectionStatus::Open
    );

    // The dropped book is rebuilt from a fresh subscription.
    let unsubscribe = next_json(&mut peer).await;
    let resubscribe = next_json(&mut peer).await;
    assert_eq!(unsubscribe["op"], "unsubscribe");
    assert_eq!(unsubscribe["args"], json!(["orderbook.50.BTCUSDT"]));
    assert_eq!(resubscribe["op"], "subscribe");
    assert_eq!(resubscribe["args"], json!(["orderbook.50.BTCUSDT"]));

    let btc = watch_book(&client, "BTCUSDT");
    settle().await;
    peer.send_json(&book("BTCUSDT", "delta", 3, json!([["100", "2"]]), json!([])));
    settle().await;
    assert!(!btc.is_finished());

    peer.send_json(&book("BTCUSDT", "snapshot", 10, json!([["99", "3"]]), json!([])));
    let view = tokio::time::timeout(Duration::from_secs(1), btc)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(view.bids, vec![Level::new(dec!(99), dec!(3))]);
    assert_eq!(view.nonce, Some(10));
}

#[tokio::test]
async fn test_trades_delivered_without_repeats() {
    let (client, connector) = setup(client_config());
    let trade = |id: &str, price: &str| {
        json!({"T": 1_700_000_000_000u64, "s": "BTCUSDT", "S": "Buy", "v": "0.5", "p": price, "i": id})
    };

    let watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_trades("BTCUSDT").await })
    };
    let mut peer = accept(&connector).await;
    assert_eq!(next_json(&mut peer).await["args"], json!(["publicTrade.BTCUSDT"]));
    settle().await;

    peer.send_json(&json!({
        "topic": "publicTrade.BTCUSDT",
        "type": "snapshot",
        "ts": 1,
        "data": [trade("t1", "100"), trade("t2", "101")]
    }));
    let first = watcher.await.unwrap().unwrap();
    assert_eq!(first.len(), 2);

    let watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_trades("BTCUSDT").await })
    };
    settle().await;
    peer.send_json(&json!({
        "topic": "publicTrade.BTCUSDT",
        "type": "snapshot",
        "ts": 2,
        "data": [trade("t3", "102")]
    }));
    let second = watcher.await.unwrap().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, "t3");
    assert_eq!(second[0].price, dec!(102));
}

#[tokio::test]
async fn test_subscribe_rejection_fails_watch_and_allows_retry() {
    let (client, connector) = setup(client_config());

    let watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_trades("NOPEUSDT").await })
    };
    let mut peer = accept(&connector).await;
    next_json(&mut peer).await;
    settle().await;

    peer.send_json(&json!({
        "success": false,
        "ret_msg": "Invalid symbol :[publicTrade.NOPEUSDT]",
        "conn_id": "c1",
        "req_id": "publicTrade.NOPEUSDT",
        "op": "subscribe"
    }));
    assert!(matches!(
        watcher.await.unwrap(),
        Err(AdapterError::ProtocolError(_))
    ));
    settle().await;
    assert!(client.pool().get(PUBLIC).unwrap().subscriptions().is_empty());

    // The topic record is gone, so the next watch subscribes again.
    let _retry = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_trades("NOPEUSDT").await })
    };
    assert_eq!(next_json(&mut peer).await["args"], json!(["publicTrade.NOPEUSDT"]));
}

#[tokio::test]
async fn test_orders_behind_auth_handshake() {
    let (client, connector) = setup(client_config());

    let watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_orders(None).await })
    };
    let mut peer = accept(&connector).await;
    assert_eq!(peer.url(), PRIVATE);

    let auth = next_json(&mut peer).await;
    assert_eq!(auth["op"], "auth");
    assert_eq!(auth["args"][0], "test-key");
    assert_eq!(auth["args"][2].as_str().unwrap().len(), 64);
    peer.send_json(&json!({"success": true, "ret_msg": "", "op": "auth", "conn_id": "p1"}));

    let subscribe = next_json(&mut peer).await;
    assert_eq!(subscribe["args"], json!(["order"]));
    settle().await;

    let order = |status: &str, filled: &str| {
        json!({
            "id": "5923240c6880ab-c59f-420b-9adb-3639adc9dd90",
            "topic": "order",
            "creationTime": 1_672_364_262_474u64,
            "data": [{
                "symbol": "ETHUSDT", "orderId": "o-1", "side": "Buy", "orderType": "Limit",
                "price": "1800", "qty": "2", "cumExecQty": filled, "orderStatus": status,
                "orderLinkId": "mine-1", "updatedTime": "1672364262457"
            }]
        })
    };
    peer.send_json(&order("New", "0"));
    let orders = watcher.await.unwrap().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Open);
    assert_eq!(orders[0].client_order_id.as_deref(), Some("mine-1"));

    // Second call: already authenticated, already subscribed.
    let watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_orders(Some("ETHUSDT")).await })
    };
    settle().await;
    peer.send_json(&order("Filled", "2"));
    let orders = watcher.await.unwrap().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Closed);
    assert_eq!(orders[0].filled, dec!(2));
    assert!(peer.try_recv().is_none());
}

#[tokio::test]
async fn test_auth_rejection_is_retryable() {
    let (client, connector) = setup(client_config());

    let attempt = {
        let client = client.clone();
        tokio::spawn(async move { client.authenticate().await })
    };
    let mut peer = accept(&connector).await;
    assert_eq!(next_json(&mut peer).await["op"], "auth");
    peer.send_json(&json!({"success": false, "ret_msg": "Params Error", "op": "auth"}));

    assert_eq!(
        attempt.await.unwrap(),
        Err(AdapterError::AuthenticationFailed {
            reason: "Params Error".to_string()
        })
    );

    let attempt = {
        let client = client.clone();
        tokio::spawn(async move { client.authenticate().await })
    };
    assert_eq!(next_json(&mut peer).await["op"], "auth");
    peer.send_json(&json!({"success": true, "ret_msg": "", "op": "auth"}));
    assert_eq!(attempt.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_missing_credentials() {
    let connector = MemoryConnector::new();
    let config = BybitConfig {
        api_secret: None,
        ..bybit_config()
    };
    let client =
        BybitClient::with_connector(config, client_config(), Arc::new(connector.clone())).unwrap();

    assert!(matches!(
        client.watch_orders(None).await,
        Err(AdapterError::Configuration(_))
    ));
    assert!(connector.dials().is_empty());
}

#[tokio::test]
async fn test_application_ping_keeps_connection_alive() {
    let mut config = client_config();
    config.keepalive.ping_interval_ms = 40;
    config.keepalive.dead_after_factor = 2.0;
    let (client, connector) = setup(config);

    let _watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_trades("BTCUSDT").await })
    };
    let mut peer = accept(&connector).await;
    assert_eq!(next_json(&mut peer).await["op"], "subscribe");

    for _ in 0..4 {
        let ping = next_json(&mut peer).await;
        assert_eq!(ping, json!({"op": "ping"}));
        peer.send_json(&json!({"success": true, "ret_msg": "pong", "conn_id": "c1", "op": "ping"}));
    }

    let connection = client.pool().get(PUBLIC).unwrap();
    assert_eq!(connection.status(), ConnectionStatus::Open);
    assert_eq!(connection.stats().reconnects, 0);
    assert_eq!(connector.dials().len(), 1);
}

#[tokio::test]
async fn test_reconnect_replays_subscription_and_rebuilds_book() {
    let (client, connector) = setup(client_config());

    let watcher = watch_book(&client, "BTCUSDT");
    let mut peer = accept(&connector).await;
    next_json(&mut peer).await;
    peer.send_json(&book("BTCUSDT", "snapshot", 100, json!([["100", "1"]]), json!([])));
    watcher.await.unwrap().unwrap();

    let watcher = watch_book(&client, "BTCUSDT");
    settle().await;
    peer.fail(TransportError::network("connection reset"));
    assert!(matches!(
        watcher.await.unwrap(),
        Err(AdapterError::ConnectionError(_))
    ));

    let mut peer = accept(&connector).await;
    assert_eq!(next_json(&mut peer).await["args"], json!(["orderbook.50.BTCUSDT"]));

    let watcher = watch_book(&client, "BTCUSDT");
    settle().await;
    // A delta continuing the old sequence must not land on the new connection's book.
    peer.send_json(&book("BTCUSDT", "delta", 101, json!([["100", "7"]]), json!([])));
    peer.send_json(&book("BTCUSDT", "snapshot", 5, json!([["97", "3"]]), json!([])));

    let view = watcher.await.unwrap().unwrap();
    assert_eq!(view.bids, vec![Level::new(dec!(97), dec!(3))]);
    assert_eq!(client.stats(PUBLIC).unwrap().reconnects, 1);
}

#[tokio::test]
async fn test_unsupported_arguments_fail_without_dialing() {
    let (client, connector) = setup(client_config());

    assert!(matches!(
        client.watch_order_book("BTCUSDT", Some(25)).await,
        Err(AdapterError::NotSupported(_))
    ));
    assert!(matches!(
        client.watch_ohlcv("BTCUSDT", "7").await,
        Err(AdapterError::NotSupported(_))
    ));
    assert!(connector.dials().is_empty());
}

#[tokio::test]
async fn test_candles_through_client() {
    let (client, connector) = setup(client_config());
    let kline = |start: u64, close: &str| {
        json!({
            "topic": "kline.5.BTCUSDT",
            "type": "snapshot",
            "ts": start + 1,
            "data": [{
                "start": start, "end": start + 299_999, "interval": "5",
                "open": "100", "close": close, "high": "110", "low": "95",
                "volume": "12.5", "turnover": "1250", "confirm": false, "timestamp": start + 1
            }]
        })
    };

    let watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_ohlcv("BTCUSDT", "5").await })
    };
    let mut peer = accept(&connector).await;
    assert_eq!(next_json(&mut peer).await["args"], json!(["kline.5.BTCUSDT"]));
    settle().await;

    peer.send_json(&kline(300_000, "104"));
    let candles = watcher.await.unwrap().unwrap();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].close, dec!(104));

    let watcher = {
        let client = client.clone();
        tokio::spawn(async move { client.watch_ohlcv("BTCUSDT", "5").await })
    };
    settle().await;
    peer.send_json(&kline(300_000, "106"));
    let candles = watcher.await.unwrap().unwrap();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].close, dec!(106));
}
