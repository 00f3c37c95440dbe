//! # Response Cache
//!
//! Time-boxed key/value store for idempotent reads. The memory tier is always
//! present; an optional [`DurableStore`] backs it so cached reads survive a
//! restart. Durable-tier failures never reach callers: they are logged at `warn`
//! and the cache carries on with the memory tier alone.
//!
//! Reads hand out clones, so callers can never mutate a cached value in place.

pub mod durable;

pub use durable::{DurableStore, FileStore, StoreError, StoredEntry};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    /// `None` when the lifetime is too long to represent; never expires
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    durable: Option<Box<dyn DurableStore>>,
}

impl ResponseCache {
    /// Memory-only cache.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            durable: None,
        }
    }

    pub fn with_durable(mut self, store: Box<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let cache = Self::new(config.default_ttl());
        match &config.durable_dir {
            Some(dir) => cache.with_durable(Box::new(FileStore::new(dir, &config.namespace))),
            None => cache,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fetch a live value. Expired entries are evicted on the way.
    pub fn get(&self, key: &str) -> Option<Value> {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(key) {
                if entry.is_live(Instant::now()) {
                    return Some(entry.value.clone());
                }
                entries.remove(key);
            }
        }

        self.promote_from_durable(key)
    }

    /// Store a value for `ttl`, or the default lifetime when `None`.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);

        if let Some(store) = &self.durable {
            let expires_at = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl));
            if let Some(expires_at) = expires_at {
                let entry = StoredEntry {
                    value: value.clone(),
                    expires_at,
                };
                if let Err(e) = store.store(key, &entry) {
                    warn!(key = %key, error = %e, "Durable cache write failed");
                }
            }
        }

        self.insert_memory(key, value, ttl);
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
        if let Some(store) = &self.durable {
            if let Err(e) = store.remove(key) {
                warn!(key = %key, error = %e, "Durable cache delete failed");
            }
        }
    }

    /// Drop everything, including this cache's durable entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
        if let Some(store) = &self.durable {
            if let Err(e) = store.clear() {
                warn!(error = %e, "Durable cache clear failed");
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of live memory-tier entries. Purges expired ones first.
    pub fn size(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        entries.len()
    }

    fn insert_memory(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    fn promote_from_durable(&self, key: &str) -> Option<Value> {
        let store = self.durable.as_ref()?;
        let entry = match store.load(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Durable cache read failed");
                return None;
            }
        };

        let now = Utc::now();
        if entry.is_expired(now) {
            if let Err(e) = store.remove(key) {
                warn!(key = %key, error = %e, "Durable cache eviction failed");
            }
            return None;
        }

        let remaining = (entry.expires_at - now).to_std().unwrap_or_default();
        debug!(key = %key, remaining_ms = remaining.as_millis() as u64, "Promoted durable cache entry");
        self.insert_memory(key, entry.value.clone(), remaining);
        Some(entry.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(600));
        cache.set("k", json!({"v": 1}), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("k"), Some(json!({"v": 1})));
        assert_eq!(cache.size(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_purges_expired_without_reads() {
        let cache = ResponseCache::new(Duration::from_secs(5));
        cache.set("short", json!(1), Some(Duration::from_secs(1)));
        cache.set("long", json!(2), None);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.size(), 1);
        assert!(cache.has("long"));
        assert!(!cache.has("short"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_never_expires() {
        let cache = ResponseCache::new(Duration::MAX);
        cache.set("forever", json!("kept"), Some(Duration::MAX));
        cache.set("default", json!("kept"), None);

        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(cache.get("forever"), Some(json!("kept")));
        assert_eq!(cache.get("default"), Some(json!("kept")));
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set("a", json!("a"), None);
        cache.set("b", json!("b"), None);

        cache.delete("a");
        assert!(!cache.has("a"));
        assert_eq!(cache.size(), 1);

        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_reads_are_copies() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set("k", json!({"items": [1]}), None);

        let mut copy = cache.get("k").unwrap();
        copy["items"] = json!([1, 2, 3]);
        assert_eq!(cache.get("k"), Some(json!({"items": [1]})));
    }

    #[test]
    fn test_durable_hit_is_promoted() {
        let dir = TempDir::new().unwrap();
        let first = ResponseCache::new(Duration::from_secs(60))
            .with_durable(Box::new(FileStore::new(dir.path(), "test")));
        first.set("results:a1", json!({"status": "pass"}), None);

        let second = ResponseCache::new(Duration::from_secs(60))
            .with_durable(Box::new(FileStore::new(dir.path(), "test")));
        assert_eq!(second.size(), 0);
        assert_eq!(second.get("results:a1"), Some(json!({"status": "pass"})));
        assert_eq!(second.size(), 1);
    }

    #[test]
    fn test_unavailable_durable_tier_is_ignored() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let cache = ResponseCache::new(Duration::from_secs(60))
            .with_durable(Box::new(FileStore::new(&blocker, "test")));
        cache.set("k", json!(1), None);
        assert_eq!(cache.get("k"), Some(json!(1)));
        cache.delete("k");
        cache.clear();
        assert!(!cache.has("k"));
    }
}
