//! Layered cache (spec section 4.G): local [`MemoryCache`] in front of a
//! [`DistributedCache`], composed under one of three write policies.
//! Write-back returns to the caller once the local write lands and
//! finishes the remote write in a detached task bounded by
//! [`super::WRITE_BACK_TIMEOUT_SECS`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

use super::memory::MemoryCache;
use super::remote::DistributedCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayeredCachePolicy {
    /// Writes land in both tiers before `set` returns.
    WriteThrough,
    /// Writes land locally; the remote write is detached.
    WriteBack,
    /// Reads fall through to remote on a local miss and backfill locally.
    ReadThrough,
}

/// Default local-tier TTL (spec section 8 scenario 5's `LocalTTL=5m`)
/// used whenever a caller doesn't pass an explicit override.
const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(5 * 60);
/// Default remote-tier TTL (scenario 5's `RemoteTTL=30m`).
const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(30 * 60);

pub struct LayeredCache {
    local: Arc<MemoryCache>,
    remote: Arc<dyn DistributedCache>,
    policy: LayeredCachePolicy,
    local_ttl: Duration,
    remote_ttl: Duration,
}

impl LayeredCache {
    pub fn new(local: Arc<MemoryCache>, remote: Arc<dyn DistributedCache>, policy: LayeredCachePolicy) -> Self {
        Self { local, remote, policy, local_ttl: DEFAULT_LOCAL_TTL, remote_ttl: DEFAULT_REMOTE_TTL }
    }

    /// Overrides the per-tier TTL defaults applied whenever `set`/`mset`
    /// is called without an explicit `ttl`, and used to promote a
    /// read-through remote hit into the local tier (spec section 4.G:
    /// "promotes the value into local with LocalTTL").
    pub fn with_ttls(mut self, local_ttl: Duration, remote_ttl: Duration) -> Self {
        self.local_ttl = local_ttl;
        self.remote_ttl = remote_ttl;
        self
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.local.get(key) {
            return Ok(Some(value));
        }
        if self.policy != LayeredCachePolicy::ReadThrough {
            return Ok(None);
        }
        match self.remote.get(key).await? {
            Some(value) => {
                self.local.set(key, value.clone(), Some(self.local_ttl));
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let local_ttl = ttl.unwrap_or(self.local_ttl);
        let remote_ttl = ttl.unwrap_or(self.remote_ttl);
        self.local.set(key, value.clone(), Some(local_ttl));

        match self.policy {
            LayeredCachePolicy::WriteThrough | LayeredCachePolicy::ReadThrough => {
                // Local already landed; the remote write is best-effort here
                // (spec.md:136 — success if either tier succeeded).
                if let Err(err) = self.remote.set(key, value, Some(remote_ttl)).await {
                    tracing::warn!(%key, %err, "remote set failed after local set succeeded");
                }
            }
            LayeredCachePolicy::WriteBack => {
                let remote = Arc::clone(&self.remote);
                let key = key.to_string();
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(
                        Duration::from_secs(super::WRITE_BACK_TIMEOUT_SECS),
                        remote.set(&key, value, Some(remote_ttl)),
                    )
                    .await;
                });
            }
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let local_hit = self.local.delete(key);
        let remote_hit = match self.remote.delete(key).await {
            Ok(hit) => hit,
            Err(err) => {
                if !local_hit {
                    return Err(err);
                }
                tracing::warn!(%key, %err, "remote delete failed after local delete succeeded");
                false
            }
        };
        Ok(local_hit || remote_hit)
    }

    /// Partitions into local hits and remaining misses, consulting the
    /// remote tier only for misses (and only under `ReadThrough`).
    pub async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = self.local.mget(keys);
        if self.policy != LayeredCachePolicy::ReadThrough {
            return Ok(out);
        }
        let missing: Vec<String> = keys.iter().filter(|k| !out.contains_key(*k)).cloned().collect();
        if missing.is_empty() {
            return Ok(out);
        }
        let fetched = self.remote.mget(&missing).await?;
        for (key, value) in &fetched {
            self.local.set(key, value.clone(), Some(self.local_ttl));
        }
        out.extend(fetched);
        Ok(out)
    }

    pub async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        let local_ttl = ttl.unwrap_or(self.local_ttl);
        let remote_ttl = ttl.unwrap_or(self.remote_ttl);
        self.local.mset(items.clone(), Some(local_ttl));
        match self.policy {
            LayeredCachePolicy::WriteThrough | LayeredCachePolicy::ReadThrough => {
                // Local already landed for every item; the remote write is
                // best-effort here (spec.md:136 — success if either tier
                // succeeded).
                if let Err(err) = self.remote.mset(items, Some(remote_ttl)).await {
                    tracing::warn!(%err, "remote mset failed after local mset succeeded");
                }
            }
            LayeredCachePolicy::WriteBack => {
                let remote = Arc::clone(&self.remote);
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(
                        Duration::from_secs(super::WRITE_BACK_TIMEOUT_SECS),
                        remote.mset(items, Some(remote_ttl)),
                    )
                    .await;
                });
            }
        }
        Ok(())
    }

    pub async fn clear(&self, keys: &[String]) -> Result<usize> {
        let local_count = self.local.mdelete(keys);
        match self.remote.mdelete(keys).await {
            Ok(remote_count) => Ok(local_count.max(remote_count)),
            Err(err) => {
                if local_count == 0 {
                    return Err(err);
                }
                tracing::warn!(%err, "remote mdelete failed after local mdelete succeeded");
                Ok(local_count)
            }
        }
    }
}
