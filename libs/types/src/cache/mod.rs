//! # Bounded Rolling Caches
//!
//! Fixed-capacity, insertion-ordered containers. All three variants share one
//! eviction contract: when an append would exceed capacity, the oldest inserted
//! entry is dropped. They differ only in when an append is an update in place:
//!
//! | Cache | Used for | In-place update when |
//! |-------|----------|----------------------|
//! | [`ArrayCache`] | trade tapes | never |
//! | [`TimestampCache`] | OHLCV candles | an entry with the same bucket timestamp exists |
//! | [`IdentityCache`] | orders | an entry with the same `(symbol, id)` exists |
//!
//! An in-place update keeps the entry's position and is not a new insertion,
//! so it never evicts.

mod array;
mod identity;
mod timestamp;

pub use array::ArrayCache;
pub use identity::{IdentityCache, Identified};
pub use timestamp::{TimestampCache, Timestamped};

use std::collections::VecDeque;

/// Capacity used when the adapter does not configure one
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Insertion-ordered ring addressed by monotonically increasing sequence
/// numbers, so index maps stay valid across front evictions.
#[derive(Debug, Clone)]
pub(crate) struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Sequence number of `items[0]`
    head_seq: u64,
}

impl<T> Ring<T> {
    /// Capacity 0 is clamped to 1 so every append is observable.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_CACHE_CAPACITY)),
            capacity,
            head_seq: 0,
        }
    }

    /// Append at the back, returning the new entry's sequence number and the
    /// evicted front entry, if any.
    pub(crate) fn push(&mut self, item: T) -> (u64, Option<T>) {
        let seq = self.head_seq + self.items.len() as u64;
        self.items.push_back(item);

        let evicted = if self.items.len() > self.capacity {
            self.head_seq += 1;
            self.items.pop_front()
        } else {
            None
        };

        (seq, evicted)
    }

    pub(crate) fn get(&self, seq: u64) -> Option<&T> {
        let offset = seq.checked_sub(self.head_seq)?;
        self.items.get(offset as usize)
    }

    /// Overwrite the entry at `seq` without changing its position.
    pub(crate) fn replace(&mut self, seq: u64, item: T) -> Option<T> {
        let offset = seq.checked_sub(self.head_seq)? as usize;
        let slot = self.items.get_mut(offset)?;
        Some(std::mem::replace(slot, item))
    }

    pub(crate) fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.head_seq += self.items.len() as u64;
        self.items.clear();
    }
}
