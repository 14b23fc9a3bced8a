//! TTL key/value cache for lookup results.
//!
//! Expiry is lazy: an entry is only checked (and dropped) when it is read.
//! There is no sweep and no size bound; the cache lives as long as one
//! tuner instance.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct ClientCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
}

impl<T: Clone> ClientCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// `None` on miss or expiry.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: T, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.into(), entry);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`.  Returns how many went.
    pub fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for ClientCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let mut cache = ClientCache::new();
        cache.set("station:101.3", Some(7u32), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get("station:101.3"), Some(Some(7)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("station:101.3"), None);
        assert!(cache.is_empty(), "expired entry is dropped on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_none_is_a_hit() {
        let mut cache: ClientCache<Option<u32>> = ClientCache::new();
        cache.set("station:99.0", None, Duration::from_secs(30));
        assert_eq!(cache.get("station:99.0"), Some(None));
        assert_eq!(cache.get("station:99.1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_prefix() {
        let mut cache = ClientCache::new();
        cache.set("station:99.0", 1, Duration::from_secs(60));
        cache.set("station:99.1", 2, Duration::from_secs(60));
        cache.set("voice:dj-1", 3, Duration::from_secs(60));

        assert_eq!(cache.invalidate_prefix("station:"), 2);
        assert_eq!(cache.get("station:99.0"), None);
        assert_eq!(cache.get("voice:dj-1"), Some(3));
    }
}
