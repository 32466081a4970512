//! Dependency order cache

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug)]
struct OrderCacheEntry {
    order: Vec<String>,
    seq: u64,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, OrderCacheEntry>,
    next_seq: u64,
}

/// Bounded cache of computed rollout orders, keyed by content hash
pub struct OrderCache {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl OrderCache {
    /// Create a new order cache
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.map.get(key).map(|e| e.order.clone())
    }

    /// Insert an order, evicting the oldest entry at capacity
    pub fn insert(&self, key: String, order: Vec<String>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if !entries.map.contains_key(&key) && entries.map.len() >= self.capacity {
            if let Some(oldest) = entries
                .map
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone())
            {
                entries.map.remove(&oldest);
            }
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.map.insert(key, OrderCacheEntry { order, seq });
    }

    /// Drop every cached order
    pub fn invalidate(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.map.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
