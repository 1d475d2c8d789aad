//! # Regenerating Futures
//!
//! A [`Generation`] is a single-assignment cell that any number of tasks can
//! await. A [`FutureTable`] maps message hashes to the *current* generation of
//! each key and decides what happens once it settles:
//!
//! | Mode | After resolve | After reject |
//! |------|---------------|--------------|
//! | [`SlotMode::Streaming`] | fresh pending generation installed | removed |
//! | [`SlotMode::OneShot`] | removed | removed |
//! | [`SlotMode::Handshake`] | kept, later callers return at once | removed |
//!
//! Installing the replacement inside `resolve` means a caller that loops on
//! the same key always waits for the *next* value and never sees one twice.
//!
//! A rejection for a key nobody is waiting on is parked and delivered to the
//! next generation created for that key.

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::{AdapterError, Result};

/// One resolve/reject lifecycle of a key
pub struct Generation<V> {
    id: u64,
    outcome: OnceCell<Result<V>>,
    notify: Notify,
}

impl<V: Clone> Generation<V> {
    fn new(id: u64) -> Self {
        Self {
            id,
            outcome: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    /// Identifier unique within the owning table
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True once resolved or rejected
    pub fn is_settled(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// Outcome without waiting
    pub fn peek(&self) -> Option<Result<V>> {
        self.outcome.get().cloned()
    }

    /// Settle and wake every waiter; false if already settled
    pub(crate) fn settle(&self, outcome: Result<V>) -> bool {
        let settled = self.outcome.set(outcome).is_ok();
        if settled {
            self.notify.notify_waiters();
        }
        settled
    }

    /// Wait for the outcome
    ///
    /// Dropping the returned future does not affect other waiters.
    pub async fn wait(&self) -> Result<V> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a settle in between is not missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }
}

impl<V> std::fmt::Debug for Generation<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("settled", &self.outcome.get().is_some())
            .finish()
    }
}

/// Settlement policy of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMode {
    /// Subscription key that keeps serving updates
    Streaming,
    /// Request/response key removed once settled
    OneShot,
    /// Authentication key that stays resolved for the connection's lifetime
    Handshake,
}

struct Slot<V> {
    mode: SlotMode,
    current: Arc<Generation<V>>,
}

/// Pending generations of one connection, keyed by message hash
pub struct FutureTable<V> {
    slots: HashMap<String, Slot<V>>,
    deferred: HashMap<String, AdapterError>,
    next_id: u64,
}

impl<V: Clone> FutureTable<V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            deferred: HashMap::new(),
            next_id: 0,
        }
    }

    /// Current generation for `key`, creating it if absent
    ///
    /// A parked rejection for `key` settles the new generation immediately;
    /// that generation is handed out once and not stored.
    pub fn create(&mut self, key: &str, mode: SlotMode) -> Arc<Generation<V>> {
        if let Some(slot) = self.slots.get(key) {
            return slot.current.clone();
        }

        let generation = self.fresh();
        if let Some(error) = self.deferred.remove(key) {
            generation.settle(Err(error));
            return generation;
        }

        self.slots.insert(
            key.to_string(),
            Slot {
                mode,
                current: generation.clone(),
            },
        );
        generation
    }

    /// Resolve the current generation of `key`
    ///
    /// Returns `None` if no generation exists, otherwise whether any caller was
    /// holding the settled generation.
    pub fn resolve(&mut self, key: &str, value: V) -> Option<bool> {
        let slot = self.slots.get(key)?;
        let observed = Arc::strong_count(&slot.current) > 1;
        let mode = slot.mode;
        slot.current.settle(Ok(value));

        match mode {
            SlotMode::Streaming => {
                let replacement = self.fresh();
                if let Some(slot) = self.slots.get_mut(key) {
                    slot.current = replacement;
                }
            }
            SlotMode::OneShot => {
                self.slots.remove(key);
            }
            SlotMode::Handshake => {}
        }
        Some(observed)
    }

    /// Reject the current generation of `key` and remove it
    ///
    /// Without a generation the error is parked for the next `create`.
    /// Returns true if a generation was rejected.
    pub fn reject(&mut self, key: &str, error: AdapterError) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                slot.current.settle(Err(error));
                true
            }
            None => {
                self.deferred.insert(key.to_string(), error);
                false
            }
        }
    }

    /// Reject and remove every generation; parked rejections are discarded
    ///
    /// Returns the number of generations rejected.
    pub fn reject_all(&mut self, error: &AdapterError) -> usize {
        self.deferred.clear();
        let mut rejected = 0;
        for (_, slot) in self.slots.drain() {
            slot.current.settle(Err(error.clone()));
            rejected += 1;
        }
        rejected
    }

    /// Remove `key` only if its current generation is `generation_id`
    pub fn remove_if(&mut self, key: &str, generation_id: u64) -> bool {
        let matches = self
            .slots
            .get(key)
            .is_some_and(|slot| slot.current.id() == generation_id);
        if matches {
            self.slots.remove(key);
        }
        matches
    }

    /// True if `key` has a generation
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// True if a rejection is parked for `key`
    pub fn has_deferred(&self, key: &str) -> bool {
        self.deferred.contains_key(key)
    }

    /// Number of keys with a generation
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no key has a generation
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Keys with a generation, unordered
    pub fn keys(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    fn fresh(&mut self) -> Arc<Generation<V>> {
        self.next_id += 1;
        Arc::new(Generation::new(self.next_id))
    }
}

impl<V: Clone> Default for FutureTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
