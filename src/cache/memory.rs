//! In-memory cache tier (spec section 4.G): a bounded map with one of
//! four eviction policies, swept on an interval. One mutex covers both
//! map and sweeper operations — the teacher's cache tier does the same
//! rather than split locks across a hot path this small.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

use super::{now_secs, CacheEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Fifo,
    TtlFirst,
}

#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    pub max_entries: usize,
    pub eviction_policy: EvictionPolicy,
    pub cleanup_interval: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: super::DEFAULT_MAX_ENTRIES,
            eviction_policy: EvictionPolicy::Lru,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
}

/// Memory tier. Cloning shares the underlying map (`Arc`); the
/// sweeper task holds its own clone and outlives the value returned to
/// callers only as long as [`MemoryCache::stop_sweeper`] isn't called.
pub struct MemoryCache {
    config: MemoryCacheConfig,
    inner: Arc<Mutex<Inner>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
    seq: AtomicU64,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner { entries: HashMap::new() })),
            sweeper: Mutex::new(None),
            seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Spawns the background sweeper; idempotent, replaces any prior
    /// handle.
    pub fn start_sweeper(&self) {
        let inner = Arc::clone(&self.inner);
        let interval = self.config.cleanup_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let mut guard = inner.lock();
                guard.entries.retain(|_, e| !e.is_expired());
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Picks the eviction victim per policy; `(wall_clock, seq)` ties are
    /// broken by `seq` since several entries can land in the same
    /// wall-clock second.
    fn evict_one(entries: &mut HashMap<String, CacheEntry>, policy: EvictionPolicy) {
        let victim = match policy {
            EvictionPolicy::Lru => entries.values().min_by_key(|e| (e.last_access, e.access_seq)).map(|e| e.key.clone()),
            EvictionPolicy::Lfu => entries.values().min_by_key(|e| (e.access_count, e.access_seq)).map(|e| e.key.clone()),
            EvictionPolicy::Fifo => entries.values().min_by_key(|e| (e.created_at, e.created_seq)).map(|e| e.key.clone()),
            EvictionPolicy::TtlFirst => entries
                .values()
                .filter(|e| e.expires_at.is_some())
                .min_by_key(|e| (e.expires_at.unwrap(), e.created_seq))
                .map(|e| e.key.clone())
                .or_else(|| entries.values().min_by_key(|e| (e.created_at, e.created_seq)).map(|e| e.key.clone())),
        };
        if let Some(key) = victim {
            entries.remove(&key);
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let seq = self.next_seq();
        let mut inner = self.inner.lock();
        let expired = inner.entries.get(key).map(|e| e.is_expired()).unwrap_or(false);
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.entries.get_mut(key).map(|e| {
            e.touch_with_seq(seq);
            e.value.clone()
        })
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let seq = self.next_seq();
        let mut inner = self.inner.lock();
        if inner.entries.len() >= self.config.max_entries && !inner.entries.contains_key(key) {
            Self::evict_one(&mut inner.entries, self.config.eviction_policy);
        }
        inner.entries.insert(key.to_string(), CacheEntry::with_seq(key, value, ttl.map(|d| d.as_secs()), seq));
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    pub fn mget(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        keys.iter().filter_map(|k| self.get(k).map(|v| (k.clone(), v))).collect()
    }

    pub fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) {
        for (key, value) in items {
            self.set(&key, value, ttl);
        }
    }

    pub fn mdelete(&self, keys: &[String]) -> usize {
        keys.iter().filter(|k| self.delete(k)).count()
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now_secs() + ttl.as_secs());
                Ok(())
            }
            None => Err(FabricError::CacheNotFound(key.to_string())),
        }
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock();
        inner.entries.get(key).and_then(|e| e.expires_at).map(|exp| {
            Duration::from_secs(exp.saturating_sub(now_secs()))
        })
    }

    /// Unfiltered key list, per spec section 4.G.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(policy: EvictionPolicy, max_entries: usize) -> MemoryCache {
        MemoryCache::new(MemoryCacheConfig { max_entries, eviction_policy: policy, ..Default::default() })
    }

    #[test]
    fn get_refreshes_last_access_and_increments_count() {
        let cache = cache(EvictionPolicy::Lru, 10);
        cache.set("a", vec![1], None);
        assert_eq!(cache.get("a"), Some(vec![1]));
        assert_eq!(cache.get("a"), Some(vec![1]));
    }

    #[test]
    fn expired_entry_reported_as_miss_and_removed() {
        let cache = cache(EvictionPolicy::Lru, 10);
        cache.set("a", vec![1], Some(Duration::from_secs(0)));
        assert_eq!(cache.get("a"), None);
        assert!(!cache.keys().contains(&"a".to_string()));
    }

    #[test]
    fn lfu_evicts_least_frequently_used() {
        let cache = cache(EvictionPolicy::Lfu, 2);
        cache.set("a", vec![1], None);
        cache.set("b", vec![2], None);
        cache.get("a");
        cache.get("a");
        cache.set("c", vec![3], None);
        assert!(cache.keys().contains(&"a".to_string()));
        assert!(!cache.keys().contains(&"b".to_string()));
    }

    #[test]
    fn fifo_evicts_earliest_created() {
        let cache = cache(EvictionPolicy::Fifo, 1);
        cache.set("a", vec![1], None);
        cache.set("b", vec![2], None);
        assert!(!cache.keys().contains(&"a".to_string()));
        assert!(cache.keys().contains(&"b".to_string()));
    }

    #[test]
    fn mget_mset_mdelete_round_trip() {
        let cache = cache(EvictionPolicy::Lru, 10);
        cache.mset(vec![("a".into(), vec![1]), ("b".into(), vec![2])], None);
        let got = cache.mget(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(got.len(), 2);
        assert_eq!(cache.mdelete(&["a".into(), "b".into()]), 2);
    }

    #[test]
    fn lru_eviction_follows_the_literal_spec_scenario() {
        let cache = cache(EvictionPolicy::Lru, 3);
        cache.set("key1", b"v1".to_vec(), Some(Duration::from_secs(60)));
        cache.set("key2", b"v2".to_vec(), Some(Duration::from_secs(60)));
        cache.set("key3", b"v3".to_vec(), Some(Duration::from_secs(60)));
        cache.get("key1");
        cache.get("key3");
        cache.set("key4", b"v4".to_vec(), Some(Duration::from_secs(60)));
        assert_eq!(cache.get("key2"), None);
        assert!(cache.get("key1").is_some());
        assert!(cache.get("key3").is_some());
        assert!(cache.get("key4").is_some());
    }

    #[test]
    fn expire_unknown_key_fails() {
        let cache = cache(EvictionPolicy::Lru, 10);
        assert!(cache.expire("ghost", Duration::from_secs(1)).is_err());
    }
}
