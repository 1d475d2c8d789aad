//! In-memory connector
//!
//! Every `connect()` creates a fresh channel pair and hands the server side to
//! whoever is waiting in [`MemoryConnector::accept`]. Used as a scripted
//! exchange in tests and for replaying captured sessions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tracing::debug;

use super::{Connector, FrameSink, FrameStream};
use crate::{Frame, Result, TransportError};

/// Connector whose peers live in the same process
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

struct Shared {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
    /// Outcomes for upcoming dials; empty means accept
    script: Mutex<VecDeque<DialOutcome>>,
    dials: Mutex<Vec<String>>,
}

/// Scripted result of one dial attempt
#[derive(Debug, Clone)]
pub enum DialOutcome {
    /// Refuse with a connection error
    Refuse,
    /// Never complete, so the caller's connect timeout fires
    Hang,
}

impl MemoryConnector {
    /// Create a connector that accepts every dial
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded();
        Self {
            shared: Arc::new(Shared {
                accept_tx,
                accept_rx: tokio::sync::Mutex::new(accept_rx),
                script: Mutex::new(VecDeque::new()),
                dials: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queue the outcome of the next dial that is not yet scripted
    pub fn script(&self, outcome: DialOutcome) {
        self.shared.script.lock().push_back(outcome);
    }

    /// Wait for the next successful dial and return its server side
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.shared.accept_rx.lock().await.next().await
    }

    /// Like [`MemoryConnector::accept`] but gives up after `timeout`
    pub async fn accept_timeout(&self, timeout: Duration) -> Option<MemoryPeer> {
        tokio::time::timeout(timeout, self.accept()).await.ok().flatten()
    }

    /// URLs dialed so far, including refused attempts
    pub fn dials(&self) -> Vec<String> {
        self.shared.dials.lock().clone()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        self.shared.dials.lock().push(url.to_string());

        let outcome = self.shared.script.lock().pop_front();
        match outcome {
            Some(DialOutcome::Refuse) => {
                return Err(TransportError::connection("connection refused", url));
            }
            Some(DialOutcome::Hang) => {
                futures::future::pending::<()>().await;
            }
            None => {}
        }

        let (client_tx, server_rx) = mpsc::unbounded::<Frame>();
        let (server_tx, client_rx) = mpsc::unbounded::<Result<Frame>>();

        let peer = MemoryPeer {
            url: url.to_string(),
            incoming: server_rx,
            outgoing: server_tx,
        };
        self.shared
            .accept_tx
            .unbounded_send(peer)
            .map_err(|_| TransportError::connection("memory listener dropped", url))?;

        debug!(url, "memory transport connected");

        let sink = client_tx.sink_map_err(|e| TransportError::closed(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Server side of one in-memory transport
///
/// Dropping the peer ends the client's inbound stream, which the client sees
/// as the socket closing.
pub struct MemoryPeer {
    url: String,
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<Result<Frame>>,
}

impl MemoryPeer {
    /// URL the client dialed
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame written by the client; `None` once the client hung up
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming.next().await
    }

    /// Next text frame, skipping control frames
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Binary(bytes) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
                _ => continue,
            }
        }
    }

    /// Next text frame parsed as JSON, skipping control frames
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Frame already written by the client, without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.incoming.try_next().ok().flatten()
    }

    /// Push a frame to the client; false if the client is gone
    pub fn send(&self, frame: Frame) -> bool {
        self.outgoing.unbounded_send(Ok(frame)).is_ok()
    }

    /// Push a text frame to the client
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Push a JSON value as a text frame
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send(Frame::Text(value.to_string()))
    }

    /// Surface a transport error on the client's inbound stream
    pub fn fail(&self, error: TransportError) -> bool {
        self.outgoing.unbounded_send(Err(error)).is_ok()
    }
}
