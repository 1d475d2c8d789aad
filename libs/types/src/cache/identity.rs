use std::collections::HashMap;

use super::{Ring, DEFAULT_CACHE_CAPACITY};

/// Entry identified by `(symbol, id)`, e.g. an order
pub trait Identified {
    /// Market symbol the entry belongs to
    fn symbol(&self) -> &str;
    /// Exchange-assigned identifier, unique within the symbol
    fn id(&self) -> &str;
}

/// Rolling cache with one entry per `(symbol, id)`
///
/// A later status for a known order overwrites the stored one at its original
/// position rather than appending a duplicate.
#[derive(Debug, Clone)]
pub struct IdentityCache<T> {
    ring: Ring<T>,
    index: HashMap<(String, String), u64>,
}

impl<T: Identified> IdentityCache<T> {
    /// Create an empty cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
            index: HashMap::new(),
        }
    }

    /// Store `item`; returns true when it replaced an existing entry
    pub fn append(&mut self, item: T) -> bool {
        let key = (item.symbol().to_string(), item.id().to_string());

        if let Some(&seq) = self.index.get(&key) {
            self.ring.replace(seq, item);
            return true;
        }

        let (seq, evicted) = self.ring.push(item);
        self.index.insert(key, seq);
        if let Some(evicted) = evicted {
            self.index
                .remove(&(evicted.symbol().to_string(), evicted.id().to_string()));
        }
        false
    }

    /// Look up an entry by identity
    pub fn get(&self, symbol: &str, id: &str) -> Option<&T> {
        self.index
            .get(&(symbol.to_string(), id.to_string()))
            .and_then(|&seq| self.ring.get(seq))
    }

    /// Entries for one symbol, oldest first
    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.ring.iter().filter(move |item| item.symbol() == symbol)
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.ring.iter()
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
}

impl<T: Identified + Clone> IdentityCache<T> {
    /// Copy of all entries, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.ring.iter().cloned().collect()
    }
}

impl<T: Identified> Default for IdentityCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
