//! # Connection
//!
//! One transport to one URL, shared by any number of caller tasks. Callers
//! register interest in a message hash, send a subscribe/request frame if
//! needed and await the hash's current [`Generation`](crate::Generation). The
//! supervisor task owns the read half and the adapter's [`MessageHandler`],
//! and settles generations as frames arrive.
//!
//! Shared state (pending table, subscription records) sits behind a
//! `parking_lot` mutex that is only held for table updates, never across an
//! `.await`. Writes are serialized through an async mutex around the sink.

use futures::SinkExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

use network::{Connector, Frame, FrameSink};

use crate::future::{FutureTable, Generation, SlotMode};
use crate::handler::{MessageContext, MessageHandler};
use crate::throttle::SubscribeThrottle;
use crate::{AdapterError, ClientConfig, Result};

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Dialing, replaying subscriptions, or waiting to reconnect
    Connecting,
    /// Serving calls
    Open,
    /// `close()` requested, shutting down
    Closing,
    /// Terminal; the pool builds a new connection on next use
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closing => "closing",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Counters for health reporting
#[derive(Debug, Default)]
pub struct ConnectionStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_sent: AtomicU64,
    resolutions: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Inbound frames of any kind
    pub frames_received: u64,
    /// Data frames the handler failed on
    pub frames_dropped: u64,
    /// Outbound frames written
    pub frames_sent: u64,
    /// Generations resolved
    pub resolutions: u64,
    /// Transports rebuilt after a failure
    pub reconnects: u64,
}

impl ConnectionStats {
    pub(crate) fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

struct State<V> {
    pending: FutureTable<V>,
    /// Topic → subscribe frame, in first-subscribe order
    subscriptions: Vec<(String, Frame)>,
    last_activity: Instant,
}

/// State shared between caller handles and the supervisor task
pub(crate) struct Shared<V> {
    url: String,
    pub(crate) config: Arc<ClientConfig>,
    state: Mutex<State<V>>,
    writer: tokio::sync::Mutex<Option<FrameSink>>,
    status: watch::Sender<ConnectionStatus>,
    pub(crate) stats: ConnectionStats,
    throttle: Option<Arc<SubscribeThrottle>>,
    supervised: bool,
    closing: AtomicBool,
    pub(crate) shutdown: Notify,
}

impl<V: Clone + Send + Sync + 'static> Shared<V> {
    fn new(
        url: &str,
        config: Arc<ClientConfig>,
        throttle: Option<Arc<SubscribeThrottle>>,
        supervised: bool,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            url: url.to_string(),
            config,
            state: Mutex::new(State {
                pending: FutureTable::new(),
                subscriptions: Vec::new(),
                last_activity: Instant::now(),
            }),
            writer: tokio::sync::Mutex::new(None),
            status,
            stats: ConnectionStats::default(),
            throttle,
            supervised,
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        // Closing/Closed are sticky against a late Connecting/Open.
        self.status.send_if_modified(|current| {
            let allowed = match (*current, status) {
                (ConnectionStatus::Closed, _) => false,
                (ConnectionStatus::Closing, ConnectionStatus::Closed) => true,
                (ConnectionStatus::Closing, _) => false,
                (from, to) => from != to,
            };
            if allowed {
                *current = status;
            }
            allowed
        });
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.set_status(ConnectionStatus::Closing);
            self.shutdown.notify_one();
        }
    }

    pub(crate) fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    /// Instant at which the connection has been silent for `dead_after`
    pub(crate) fn silence_deadline(&self, dead_after: std::time::Duration) -> tokio::time::Instant {
        tokio::time::Instant::from_std(self.state.lock().last_activity + dead_after)
    }

    pub(crate) fn idle_for(&self) -> std::time::Duration {
        self.state.lock().last_activity.elapsed()
    }

    pub(crate) fn resolve(&self, message_hash: &str, value: V) -> bool {
        let outcome = self.state.lock().pending.resolve(message_hash, value);
        match outcome {
            Some(delivered) => {
                self.stats.resolutions.fetch_add(1, Ordering::Relaxed);
                delivered
            }
            None => false,
        }
    }

    pub(crate) fn reject(&self, message_hash: &str, error: AdapterError) -> bool {
        self.state.lock().pending.reject(message_hash, error)
    }

    pub(crate) fn reject_all(&self, error: &AdapterError) -> usize {
        self.state.lock().pending.reject_all(error)
    }

    pub(crate) fn is_pending(&self, message_hash: &str) -> bool {
        self.state.lock().pending.contains(message_hash)
    }

    pub(crate) fn forget_subscription(&self, topic: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|(t, _)| t != topic);
        state.subscriptions.len() != before
    }

    pub(crate) fn is_subscribed(&self, topic: &str) -> bool {
        self.state
            .lock()
            .subscriptions
            .iter()
            .any(|(t, _)| t == topic)
    }

    /// Record `topic` unless present; true if newly recorded
    fn record_subscription(&self, topic: &str, frame: &Frame) -> bool {
        let mut state = self.state.lock();
        if state.subscriptions.iter().any(|(t, _)| t == topic) {
            return false;
        }
        state.subscriptions.push((topic.to_string(), frame.clone()));
        true
    }

    pub(crate) fn subscription_frames(&self) -> Vec<(String, Frame)> {
        self.state.lock().subscriptions.clone()
    }

    pub(crate) async fn install_writer(&self, sink: FrameSink) {
        *self.writer.lock().await = Some(sink);
    }

    pub(crate) async fn drop_writer(&self) {
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    /// Write one frame regardless of status
    pub(crate) async fn write(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| AdapterError::ConnectionError(format!("{} is not connected", self.url)))?;
        sink.send(frame).await?;
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait until the connection serves calls
    async fn wait_open(&self) -> Result<()> {
        let mut status = self.status.subscribe();
        loop {
            let current = *status.borrow_and_update();
            match current {
                ConnectionStatus::Open => return Ok(()),
                ConnectionStatus::Closing | ConnectionStatus::Closed => {
                    return Err(self.closed_error());
                }
                ConnectionStatus::Connecting => {}
            }
            if status.changed().await.is_err() {
                return Err(self.closed_error());
            }
        }
    }

    pub(crate) fn closed_error(&self) -> AdapterError {
        AdapterError::ConnectionClosed {
            url: self.url.clone(),
            reason: Some("connection closed".to_string()),
        }
    }
}

/// Handle to one multiplexed connection
///
/// Cheap to clone; every clone talks to the same transport.
pub struct Connection<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for Connection<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Connection<V> {
    /// Start a connection to `url` driven by `handler`
    ///
    /// Dialing happens in the background; calls made before the transport is
    /// open wait for it. Must be called inside a Tokio runtime.
    pub fn spawn<H>(
        url: &str,
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        handler: H,
        throttle: Option<Arc<SubscribeThrottle>>,
    ) -> Self
    where
        H: MessageHandler<Value = V>,
    {
        let shared = Arc::new(Shared::new(url, config, throttle, true));
        info!(url, connector = connector.name(), "Starting connection");
        tokio::spawn(crate::supervisor::run(shared.clone(), connector, handler));
        Self { shared }
    }

    /// Connection without a transport, for feeding frames by hand
    ///
    /// Used to replay captured sessions and to test handlers. Its status
    /// stays `Connecting`, so `watch`/`request` wait until it is closed.
    pub fn detached(url: &str, config: Arc<ClientConfig>) -> Self {
        Self {
            shared: Arc::new(Shared::new(url, config, None, false)),
        }
    }

    /// Run `handler` on one inbound frame and return the frames it queued
    pub fn feed<H>(&self, handler: &mut H, frame: &Frame) -> Result<Vec<Frame>>
    where
        H: MessageHandler<Value = V>,
    {
        let mut ctx = MessageContext::new(&self.shared);
        handler.handle_message(&mut ctx, frame)?;
        Ok(ctx.take_replies())
    }

    /// URL this connection serves
    pub fn url(&self) -> &str {
        self.shared.url()
    }

    /// Current lifecycle status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Watch channel for status changes
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// True once the connection is terminal
    pub fn is_closed(&self) -> bool {
        self.shared.status() == ConnectionStatus::Closed
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Recorded subscription topics in first-subscribe order
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared
            .subscription_frames()
            .into_iter()
            .map(|(topic, _)| topic)
            .collect()
    }

    /// Number of message hashes with a pending or handshake generation
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Current streaming generation for `message_hash`, created if absent
    ///
    /// Registers interest without sending anything.
    pub fn future(&self, message_hash: &str) -> Arc<Generation<V>> {
        self.shared
            .state
            .lock()
            .pending
            .create(message_hash, SlotMode::Streaming)
    }

    /// Await the next value for a streaming `message_hash`
    ///
    /// Sends `subscribe` only if `topic` has no subscription record yet;
    /// `throttle` routes that send through the pool's subscribe limiter. A
    /// failed send drops the record so a later call retries it.
    pub async fn watch(
        &self,
        message_hash: &str,
        subscribe: Frame,
        topic: &str,
        throttle: bool,
    ) -> Result<V> {
        let generation = self
            .shared
            .state
            .lock()
            .pending
            .create(message_hash, SlotMode::Streaming);

        if let Some(outcome) = self.open_or_settled(&generation).await {
            return outcome;
        }

        if self.shared.record_subscription(topic, &subscribe) {
            if throttle {
                if let Some(limiter) = &self.shared.throttle {
                    limiter.wait().await;
                }
            }
            debug!(url = %self.shared.url, topic, message_hash, "Subscribing");
            if let Err(e) = self.shared.write(subscribe).await {
                self.shared.forget_subscription(topic);
                return Err(e);
            }
        }

        generation.wait().await
    }

    /// Send `payload` and await the one-shot response for `message_hash`
    ///
    /// Fails with `RequestTimeout` after the configured request timeout; the
    /// pending entry is removed either way.
    pub async fn request(&self, message_hash: &str, payload: Frame) -> Result<V> {
        let generation = self
            .shared
            .state
            .lock()
            .pending
            .create(message_hash, SlotMode::OneShot);

        let timeout = self.shared.config.request_timeout();
        let exchange = async {
            if let Some(outcome) = self.open_or_settled(&generation).await {
                return outcome;
            }
            self.shared.write(payload).await?;
            generation.wait().await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => {
                if outcome.is_err() {
                    self.shared
                        .state
                        .lock()
                        .pending
                        .remove_if(message_hash, generation.id());
                }
                outcome
            }
            Err(_) => {
                self.shared
                    .state
                    .lock()
                    .pending
                    .remove_if(message_hash, generation.id());
                Err(AdapterError::RequestTimeout {
                    operation: format!("request {message_hash}"),
                    timeout_ms: self.shared.config.request_timeout_ms,
                })
            }
        }
    }

    /// Run an authentication handshake once per connection
    ///
    /// Concurrent and later callers share the same generation: once resolved
    /// it returns immediately until the connection drops. A rejection clears
    /// it so the next call sends `payload` again.
    pub async fn authenticate(&self, message_hash: &str, payload: Frame) -> Result<V> {
        let (generation, first) = {
            let mut state = self.shared.state.lock();
            let first = !state.pending.contains(message_hash);
            (state.pending.create(message_hash, SlotMode::Handshake), first)
        };

        if first && !generation.is_settled() {
            if let Some(outcome) = self.open_or_settled(&generation).await {
                return outcome;
            }
            debug!(url = %self.shared.url, message_hash, "Sending authentication");
            if let Err(e) = self.shared.write(payload).await {
                self.shared.reject(message_hash, e.clone());
                return Err(e);
            }
        }

        generation.wait().await
    }

    /// Wait for the connection to open unless `generation` settles first
    ///
    /// `None` once open; otherwise the outcome to return to the caller, so a
    /// `reject_all` while dialing or backing off ends the wait.
    async fn open_or_settled(&self, generation: &Generation<V>) -> Option<Result<V>> {
        tokio::select! {
            biased;
            outcome = generation.wait() => Some(outcome),
            opened = self.shared.wait_open() => match opened {
                Ok(()) => None,
                Err(e) => Some(generation.peek().unwrap_or(Err(e))),
            },
        }
    }

    /// Send a frame; fails unless the connection is open
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.shared.status() != ConnectionStatus::Open {
            return Err(AdapterError::ConnectionError(format!(
                "{} is not open ({})",
                self.shared.url,
                self.shared.status()
            )));
        }
        self.shared.write(frame).await
    }

    /// Resolve the waiters of `message_hash`; true if the value was delivered
    pub fn resolve(&self, message_hash: &str, value: V) -> bool {
        self.shared.resolve(message_hash, value)
    }

    /// Reject the waiters of `message_hash`, or park the error for the next waiter
    pub fn reject(&self, message_hash: &str, error: AdapterError) -> bool {
        self.shared.reject(message_hash, error)
    }

    /// Reject every pending waiter and empty the pending table
    pub fn reject_all(&self, error: AdapterError) -> usize {
        self.shared.reject_all(&error)
    }

    /// Ask the connection to shut down without waiting
    pub fn shutdown(&self) {
        self.shared.request_shutdown();
        // Detached connections have no supervisor to finish the job.
        if !self.shared.supervised {
            self.shared.set_status(ConnectionStatus::Closed);
            self.shared.reject_all(&self.shared.closed_error());
        }
    }

    /// Close the connection and wait until it is terminal
    pub async fn close(&self) {
        self.shutdown();
        let mut status = self.status_watch();
        while *status.borrow_and_update() != ConnectionStatus::Closed {
            if status.changed().await.is_err() {
                break;
            }
        }
    }
}

impl<V> fmt::Debug for Connection<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.shared.url)
            .field("status", &*self.shared.status.borrow())
            .finish()
    }
}
