//! In-memory LRU tier
//!
//! Bounded by entry count. Insertion order of the underlying `IndexMap` is
//! the recency order: index 0 is the least recently used entry.

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Recency-ordered map with a fixed capacity
#[derive(Debug)]
struct LruMap {
    entries: IndexMap<String, String>,
    capacity: usize,
}

impl LruMap {
    fn touch(&mut self, key: &str) -> Option<&String> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, v)| v)
    }

    fn insert(&mut self, key: String, value: String) -> Option<String> {
        if self.capacity == 0 {
            return None;
        }
        self.entries.shift_remove(&key);

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            evicted = self.entries.shift_remove_index(0).map(|(k, _)| k);
        }
        self.entries.insert(key, value);
        evicted
    }
}

/// Shared memory tier, safe for concurrent readers and writers
#[derive(Debug)]
pub struct MemoryTier {
    inner: Mutex<LruMap>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruMap {
                entries: IndexMap::with_capacity(capacity.min(1024)),
                capacity,
            }),
        }
    }

    /// Presence check; does not count as an access
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Lookup that refreshes the entry's recency
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().touch(key).cloned()
    }

    /// Insert or replace; returns the evicted key, if any
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.inner.lock().insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
