use std::collections::HashMap;

use super::{Ring, DEFAULT_CACHE_CAPACITY};

/// Entry keyed by the start of its time bucket (milliseconds)
pub trait Timestamped {
    /// Bucket start timestamp in milliseconds since epoch
    fn timestamp(&self) -> u64;
}

/// Rolling cache with at most one entry per bucket timestamp
///
/// Exchanges retransmit the in-progress candle many times per bucket. An
/// append whose bucket is already stored overwrites that entry in place; an
/// append older than the newest bucket that is not stored is dropped, which
/// keeps timestamps monotonic.
#[derive(Debug, Clone)]
pub struct TimestampCache<T> {
    ring: Ring<T>,
    index: HashMap<u64, u64>,
}

impl<T: Timestamped> TimestampCache<T> {
    /// Create an empty cache holding at most `capacity` buckets
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
            index: HashMap::new(),
        }
    }

    /// Store `item`; returns false when it was dropped as out of order
    pub fn append(&mut self, item: T) -> bool {
        let ts = item.timestamp();

        if let Some(&seq) = self.index.get(&ts) {
            self.ring.replace(seq, item);
            return true;
        }

        if self.ring.last().is_some_and(|last| ts < last.timestamp()) {
            return false;
        }

        let (seq, evicted) = self.ring.push(item);
        self.index.insert(ts, seq);
        if let Some(evicted) = evicted {
            self.index.remove(&evicted.timestamp());
        }
        true
    }

    /// Entry for a bucket, if stored
    pub fn get(&self, timestamp: u64) -> Option<&T> {
        self.index
            .get(&timestamp)
            .and_then(|&seq| self.ring.get(seq))
    }

    /// Entries in ascending bucket order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.ring.iter()
    }

    /// Newest bucket
    pub fn last(&self) -> Option<&T> {
        self.ring.last()
    }

    /// Number of stored buckets
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Drop every bucket
    pub fn clear(&mut self) {
        self.ring.clear();
        self.index.clear();
    }
}

impl<T: Timestamped + Clone> TimestampCache<T> {
    /// Copy of all buckets in ascending order
    pub fn to_vec(&self) -> Vec<T> {
        self.ring.iter().cloned().collect()
    }
}

impl<T: Timestamped> Default for TimestampCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
