//! Scripted JSON protocol shared by the integration tests
//!
//! Server frames understood by [`JsonHandler`]:
//!
//! - `{"hash": h, "data": v}` resolves `h` with `v`
//! - `{"hash": h, "error": msg}` rejects `h` with a protocol error
//! - `{"auth": true}` / `{"auth": false, "topic": t}` settles the handshake
//! - `{"op": "pong"}` counts as keepalive traffic
//! - `{"op": "ping"}` is answered with `{"op": "pong"}`

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use stream_client::{
    AdapterError, ClientConfig, Connection, Frame, MemoryConnector, MemoryPeer, MessageContext,
    MessageHandler, Result,
};

pub const URL: &str = "mem://exchange";
pub const AUTH_HASH: &str = "authenticated";

#[derive(Default)]
pub struct JsonHandler {
    pub app_ping: bool,
    pub opened: usize,
    pub disconnects: Vec<AdapterError>,
}

impl MessageHandler for JsonHandler {
    type Value = Value;

    fn handle_message(&mut self, ctx: &mut MessageContext<'_, Value>, frame: &Frame) -> Result<()> {
        let text = frame
            .as_text()
            .ok_or_else(|| AdapterError::ProtocolError("expected text frame".into()))?;
        let message: Value = serde_json::from_str(text)?;

        if let Some(op) = message["op"].as_str() {
            match op {
                "pong" => ctx.record_pong(),
                "ping" => ctx.reply(Frame::from(json!({ "op": "pong" }))),
                other => return Err(AdapterError::ProtocolError(format!("unknown op {other}"))),
            }
            return Ok(());
        }

        if let Some(ok) = message["auth"].as_bool() {
            if ok {
                ctx.resolve(AUTH_HASH, json!("ok"));
            } else {
                if let Some(topic) = message["topic"].as_str() {
                    ctx.forget_subscription(topic);
                }
                ctx.reject(
                    AUTH_HASH,
                    AdapterError::AuthenticationFailed {
                        reason: "invalid signature".into(),
                    },
                );
            }
            return Ok(());
        }

        let hash = message["hash"]
            .as_str()
            .ok_or_else(|| AdapterError::ProtocolError("missing hash".into()))?;
        if let Some(error) = message["error"].as_str() {
            ctx.reject(hash, AdapterError::ProtocolError(error.to_string()));
        } else {
            ctx.resolve(hash, message["data"].clone());
        }
        Ok(())
    }

    fn ping(&mut self) -> Option<Frame> {
        self.app_ping.then(|| Frame::from(json!({ "op": "ping" })))
    }

    fn on_open(&mut self, _ctx: &mut MessageContext<'_, Value>) {
        self.opened += 1;
    }

    fn on_disconnect(&mut self, error: &AdapterError) {
        self.disconnects.push(error.clone());
    }
}

/// Configuration with timings small enough for tests
pub fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.connect_timeout_ms = 200;
    config.request_timeout_ms = 200;
    config.keepalive.ping_interval_ms = 1_000;
    config.reconnect.base_backoff_ms = 10;
    config.reconnect.max_backoff_ms = 40;
    config.throttle.subscribes_per_second = 1_000;
    config.throttle.burst = 100;
    config
}

pub fn spawn(connector: &MemoryConnector, config: ClientConfig) -> Connection<Value> {
    Connection::spawn(
        URL,
        Arc::new(config),
        Arc::new(connector.clone()),
        JsonHandler::default(),
        None,
    )
}

pub fn subscribe(topic: &str) -> Frame {
    Frame::from(json!({ "op": "subscribe", "args": [topic] }))
}

pub async fn accept(connector: &MemoryConnector) -> MemoryPeer {
    connector
        .accept_timeout(Duration::from_secs(2))
        .await
        .expect("client never dialed")
}

pub async fn next_json(peer: &mut MemoryPeer) -> Value {
    tokio::time::timeout(Duration::from_secs(2), peer.recv_json())
        .await
        .expect("timed out waiting for client frame")
        .expect("client hung up")
}

/// Let spawned tasks reach their await points
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
