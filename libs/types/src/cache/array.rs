use super::{Ring, DEFAULT_CACHE_CAPACITY};

/// FIFO rolling cache for append-only feeds such as trade tapes
///
/// Also counts appends since the last [`ArrayCache::take_new_updates`] so a
/// watcher can hand out only the entries that arrived since its previous call.
#[derive(Debug, Clone)]
pub struct ArrayCache<T> {
    ring: Ring<T>,
    new_updates: usize,
}

impl<T> ArrayCache<T> {
    /// Create an empty cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
            new_updates: 0,
        }
    }

    /// Append an entry, evicting the oldest one past capacity
    pub fn append(&mut self, item: T) {
        self.ring.push(item);
        self.new_updates = (self.new_updates + 1).min(self.ring.capacity());
    }

    /// Number of entries appended since the previous call (bounded by capacity)
    pub fn take_new_updates(&mut self) -> usize {
        std::mem::take(&mut self.new_updates)
    }

    /// Appends since the last reset, without resetting
    pub fn new_updates(&self) -> usize {
        self.new_updates
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.ring.iter()
    }

    /// Most recent entry
    pub fn last(&self) -> Option<&T> {
        self.ring.last()
    }

    /// Number of stored entries
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

    /// Drop every entry and the pending update count
    pub fn clear(&mut self) {
        self.ring.clear();
        self.new_updates = 0;
    }
}

impl<T: Clone> ArrayCache<T> {
    /// Copy of all entries, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.ring.iter().cloned().collect()
    }

    /// Copy of the newest `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.ring.len().saturating_sub(n);
        self.ring.iter().skip(skip).cloned().collect()
    }
}

impl<T> Default for ArrayCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl<T> Extend<T> for ArrayCache<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.append(item);
        }
    }
}
