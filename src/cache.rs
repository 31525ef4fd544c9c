// src/cache.rs
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Parsed upstream responses keyed by the exact request URL.
///
/// Stale entries are not evicted on read; they stay until `purge_expired`
/// runs, so `len` may include them.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    inserted_at: Instant,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached payload for `url` if it is younger than the TTL.
    pub fn get_fresh(&self, url: &str) -> Option<Value> {
        let entry = self.entries.get(url)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.data.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, url: &str, data: Value) {
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                data,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn fresh_entries_are_served() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.insert("https://api.test/a", json!({"price": 1.5}));
        assert_eq!(cache.get_fresh("https://api.test/a"), Some(json!({"price": 1.5})));
        assert_eq!(cache.get_fresh("https://api.test/b"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_exact_urls() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.insert("https://api.test/a?days=1", json!(1));
        assert_eq!(cache.get_fresh("https://api.test/a?days=2"), None);
        assert_eq!(cache.get_fresh("https://api.test/a?days=1"), Some(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_hidden_but_kept_until_purged() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.insert("old", json!("stale"));
        tokio::time::advance(Duration::from_secs(301)).await;
        cache.insert("new", json!("fresh"));

        assert_eq!(cache.get_fresh("old"), None);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_fresh("new"), Some(json!("fresh")));
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_refreshes_the_timestamp() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.insert("k", json!(1));
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.insert("k", json!(2));
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(cache.get_fresh("k"), Some(json!(2)));
        assert!(!cache.is_empty());
    }
}
