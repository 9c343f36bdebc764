//! Two-tier distributed cache (spec section 4.G): an in-memory tier
//! with pluggable eviction, a remote KV tier treated as a collaborator,
//! and a layered composition offering write-through / write-back /
//! read-through semantics plus a warmer.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod layered;
pub mod memory;
pub mod remote;
pub mod warmer;

pub use layered::{LayeredCache, LayeredCachePolicy};
pub use memory::{EvictionPolicy, MemoryCache, MemoryCacheConfig};
pub use remote::{DistributedCache, InProcessRemoteCache};
pub use warmer::{CacheWarmer, WarmupStrategy};

/// Default maximum number of entries in the memory tier.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Warmer TTL applied to freshly loaded keys.
pub const WARM_TTL_SECONDS: u64 = 86_400;

/// Remote write-back deadline; the caller does not observe the
/// detached task's outcome past this point.
pub const WRITE_BACK_TIMEOUT_SECS: u64 = 5;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// A single cached value plus the bookkeeping eviction policies read.
///
/// `created_seq`/`access_seq` are monotonic tiebreakers alongside the
/// wall-clock `created_at`/`last_access` fields: several entries can
/// land in the same wall-clock second, and eviction must still pick a
/// single deterministic victim (spec section 8's literal LRU/FIFO
/// scenarios assume strict ordering, not second-granularity ties).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub created_at: u64,
    pub last_access: u64,
    pub access_count: u64,
    /// Absolute expiration, unix seconds; `None` means no expiry.
    pub expires_at: Option<u64>,
    pub(crate) created_seq: u64,
    pub(crate) access_seq: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl_secs: Option<u64>) -> Self {
        Self::with_seq(key, value, ttl_secs, 0)
    }

    pub(crate) fn with_seq(key: impl Into<String>, value: Vec<u8>, ttl_secs: Option<u64>, seq: u64) -> Self {
        let now = now_secs();
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_access: now,
            access_count: 0,
            expires_at: ttl_secs.map(|ttl| now + ttl),
            created_seq: seq,
            access_seq: seq,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now_secs())
    }

    pub(crate) fn touch_with_seq(&mut self, seq: u64) {
        self.last_access = now_secs();
        self.access_count += 1;
        self.access_seq = seq;
    }

    pub fn touch(&mut self) {
        self.last_access = now_secs();
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_without_ttl_never_expires() {
        let entry = CacheEntry::new("k", vec![1, 2, 3], None);
        assert!(!entry.is_expired());
    }

    #[test]
    fn entry_with_zero_ttl_is_immediately_expired() {
        let entry = CacheEntry::new("k", vec![], Some(0));
        assert!(entry.is_expired());
    }

    #[test]
    fn touch_bumps_access_count_and_last_access() {
        let mut entry = CacheEntry::new("k", vec![], None);
        assert_eq!(entry.access_count, 0);
        entry.touch();
        assert_eq!(entry.access_count, 1);
    }
}
