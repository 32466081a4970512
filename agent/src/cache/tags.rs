//! Registry tag list cache

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Cached tag list for one `(registry, image)`
#[derive(Debug, Clone)]
pub struct TagCacheEntry {
    pub tags: Arc<Vec<String>>,
    pub cached_at: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<(String, String), TagCacheEntry>,
    next_seq: u64,
}

/// Tag lists keyed by `(registry, image)` with a TTL.
///
/// A TTL of zero disables caching: every lookup misses and nothing is stored.
pub struct TagCache {
    entries: RwLock<Entries>,
    ttl: Duration,
    capacity: usize,
}

impl TagCache {
    /// Create a new tag cache
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Get a fresh tag list
    pub fn get(&self, registry: &str, image: &str) -> Option<Arc<Vec<String>>> {
        if !self.is_enabled() {
            return None;
        }
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .map
            .get(&(registry.to_string(), image.to_string()))
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.tags.clone())
    }

    /// Store a tag list, evicting the oldest entry at capacity
    pub fn insert(&self, registry: &str, image: &str, tags: Vec<String>) -> Arc<Vec<String>> {
        let tags = Arc::new(tags);
        if !self.is_enabled() {
            return tags;
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = (registry.to_string(), image.to_string());

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
        entries.map.insert(
            key,
            TagCacheEntry {
                tags: tags.clone(),
                cached_at: Instant::now(),
                seq,
            },
        );
        tags
    }

    /// Drop a single entry
    pub fn remove(&self, registry: &str, image: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.map.remove(&(registry.to_string(), image.to_string()));
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.map.clear();
    }

    /// Get cache size
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.map.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
