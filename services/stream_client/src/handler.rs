//! Adapter hooks invoked from a connection's receive loop

use network::Frame;

use crate::connection::Shared;
use crate::{AdapterError, Result};

/// Exchange-specific message processing for one connection
///
/// The receive loop owns the handler and calls it for every inbound data frame
/// in arrival order, so handler state (caches, order books) needs no locking.
/// Calls must not block: anything to send goes through
/// [`MessageContext::reply`] and is written after the call returns. The same
/// handler instance survives reconnects.
pub trait MessageHandler: Send + 'static {
    /// Value delivered to waiters
    type Value: Clone + Send + Sync + 'static;

    /// Process one text or binary frame
    ///
    /// An error is logged and the frame dropped; the connection keeps running.
    /// Errors meant for a particular caller go through
    /// [`MessageContext::reject`] instead.
    fn handle_message(
        &mut self,
        ctx: &mut MessageContext<'_, Self::Value>,
        frame: &Frame,
    ) -> Result<()>;

    /// Application-level ping sent on every keepalive tick
    ///
    /// `None` sends a transport-level ping frame.
    fn ping(&mut self) -> Option<Frame> {
        None
    }

    /// Called after every (re)connect, before subscriptions are replayed
    fn on_open(&mut self, _ctx: &mut MessageContext<'_, Self::Value>) {}

    /// Called when the transport is lost, after pending waiters were rejected
    fn on_disconnect(&mut self, _error: &AdapterError) {}
}

/// View of the connection handed to a [`MessageHandler`]
pub struct MessageContext<'a, V> {
    shared: &'a Shared<V>,
    replies: Vec<Frame>,
}

impl<'a, V: Clone + Send + Sync + 'static> MessageContext<'a, V> {
    pub(crate) fn new(shared: &'a Shared<V>) -> Self {
        Self {
            shared,
            replies: Vec::new(),
        }
    }

    /// URL of the connection
    pub fn url(&self) -> &str {
        self.shared.url()
    }

    /// Resolve every waiter of `message_hash`
    ///
    /// Returns true if some caller was holding the settled generation, i.e.
    /// the value was actually delivered.
    pub fn resolve(&mut self, message_hash: &str, value: V) -> bool {
        self.shared.resolve(message_hash, value)
    }

    /// Reject the waiters of `message_hash` (parked if none are waiting)
    pub fn reject(&mut self, message_hash: &str, error: AdapterError) -> bool {
        self.shared.reject(message_hash, error)
    }

    /// Reject every pending waiter on this connection
    pub fn reject_all(&mut self, error: AdapterError) -> usize {
        self.shared.reject_all(&error)
    }

    /// True if a generation exists for `message_hash`
    pub fn is_pending(&self, message_hash: &str) -> bool {
        self.shared.is_pending(message_hash)
    }

    /// Queue a frame to send once the handler returns
    pub fn reply(&mut self, frame: Frame) {
        self.replies.push(frame);
    }

    /// Record an application-level pong for keepalive accounting
    pub fn record_pong(&mut self) {
        self.shared.touch();
    }

    /// Drop the subscription record for `topic` so the next watch resends it
    pub fn forget_subscription(&mut self, topic: &str) -> bool {
        self.shared.forget_subscription(topic)
    }

    /// True if `topic` has a subscription record
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.shared.is_subscribed(topic)
    }

    pub(crate) fn take_replies(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.replies)
    }
}
