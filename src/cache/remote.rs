//! Remote KV tier (spec section 4.G): a collaborator cache reached over
//! the network in production, represented here as an async trait so the
//! layered tier never depends on a concrete transport. [`InProcessRemoteCache`]
//! is the test double — same contract, no wire.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

use super::{now_secs, CacheEntry};

#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;
    async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()>;
    async fn mdelete(&self, keys: &[String]) -> Result<usize>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    /// Glob-style `*` pattern match over keys, per spec section 4.G.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

fn glob_match(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        Some((prefix, suffix)) => key.starts_with(prefix) && key.ends_with(suffix),
        None => pattern == key,
    }
}

/// In-process stand-in for a networked KV store; namespaces keys by a
/// fixed prefix the way a real client would scope a shared cluster.
pub struct InProcessRemoteCache {
    namespace: String,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InProcessRemoteCache {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), entries: Mutex::new(HashMap::new()) }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl DistributedCache for InProcessRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let nkey = self.namespaced(key);
        let mut entries = self.entries.lock();
        let expired = entries.get(&nkey).map(|e| e.is_expired()).unwrap_or(false);
        if expired {
            entries.remove(&nkey);
            return Ok(None);
        }
        Ok(entries.get_mut(&nkey).map(|e| {
            e.touch();
            e.value.clone()
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let nkey = self.namespaced(key);
        self.entries.lock().insert(nkey, CacheEntry::new(key, value, ttl.map(|d| d.as_secs())));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(&self.namespaced(key)).is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in items {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    async fn mdelete(&self, keys: &[String]) -> Result<usize> {
        let mut count = 0;
        for key in keys {
            if self.delete(key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let nkey = self.namespaced(key);
        let mut entries = self.entries.lock();
        match entries.get_mut(&nkey) {
            Some(entry) => {
                entry.expires_at = Some(now_secs() + ttl.as_secs());
                Ok(())
            }
            None => Err(crate::error::FabricError::CacheNotFound(key.to_string())),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let nkey = self.namespaced(key);
        let entries = self.entries.lock();
        Ok(entries.get(&nkey).and_then(|e| e.expires_at).map(|exp| Duration::from_secs(exp.saturating_sub(now_secs()))))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = format!("{}:", self.namespace);
        let entries = self.entries.lock();
        Ok(entries
            .keys()
            .filter_map(|nkey| nkey.strip_prefix(&prefix))
            .filter(|key| glob_match(pattern, key))
            .map(|key| key.to_string())
            .collect())
    }
}
