//! The external catalog collaborator (spec section 4.I).
//!
//! Discovery treats the backing store as a generic cluster key-value
//! service: register-with-TTL, TTL update, and a long-poll list query
//! whose `wait_index` changes whenever any member changes. This module
//! defines that contract plus an in-process reference implementation
//! used by tests and as the default when no external catalog is wired
//! in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{FabricError, Result};

/// A single registered service entry as the catalog stores it.
#[derive(Debug, Clone)]
pub struct CatalogService {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
}

/// `query_service` result: the current member set plus an index that
/// changes whenever the set changes, letting callers long-poll for the
/// next change instead of re-fetching on a fixed interval.
pub struct QueryResult {
    pub services: Vec<CatalogService>,
    pub last_index: u64,
}

/// The collaborator contract discovery depends on (spec section 4.I).
/// Implementors of a real backend (Consul, etcd, a cloud control plane)
/// adapt their native API to this shape.
#[async_trait]
pub trait ClusterCatalog: Send + Sync {
    async fn register_service(
        &self,
        id: &str,
        name: &str,
        address: &str,
        port: u16,
        tags: Vec<String>,
        meta: HashMap<String, String>,
        ttl: Duration,
        deregister_after: Duration,
    ) -> Result<()>;

    async fn deregister_service(&self, id: &str) -> Result<()>;

    /// `status` is "passing" or "critical" per the catalog's check vocabulary.
    async fn update_ttl(&self, check_id: &str, note: &str, status: &str) -> Result<()>;

    /// Long-polls until `wait_index` is stale or `wait_time` elapses,
    /// whichever comes first, then returns the current member set.
    async fn query_service(
        &self,
        name: &str,
        wait_index: u64,
        wait_time: Duration,
    ) -> Result<QueryResult>;
}

#[derive(Debug, Clone)]
struct Entry {
    service: CatalogService,
    status: String,
}

/// A purely in-process catalog, useful for tests and single-process
/// deployments that don't need an external store. Index bumps on every
/// mutation; `query_service` wakes waiters via a `Notify` rather than
/// busy-polling.
pub struct InProcessCatalog {
    entries: Mutex<HashMap<String, Entry>>,
    index: AtomicU64,
    notify: Notify,
}

impl InProcessCatalog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            index: AtomicU64::new(1),
            notify: Notify::new(),
        }
    }

    fn bump(&self) -> u64 {
        let next = self.index.fetch_add(1, Ordering::AcqRel) + 1;
        self.notify.notify_waiters();
        next
    }

    fn snapshot(&self, name: &str) -> Vec<CatalogService> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.service.name == name)
            .map(|e| e.service.clone())
            .collect()
    }
}

impl Default for InProcessCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterCatalog for InProcessCatalog {
    async fn register_service(
        &self,
        id: &str,
        name: &str,
        address: &str,
        port: u16,
        tags: Vec<String>,
        meta: HashMap<String, String>,
        _ttl: Duration,
        _deregister_after: Duration,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            id.to_string(),
            Entry {
                service: CatalogService {
                    id: id.to_string(),
                    name: name.to_string(),
                    address: address.to_string(),
                    port,
                    tags,
                    meta,
                },
                status: "passing".to_string(),
            },
        );
        drop(entries);
        self.bump();
        Ok(())
    }

    async fn deregister_service(&self, id: &str) -> Result<()> {
        let removed = self.entries.lock().remove(id).is_some();
        if removed {
            self.bump();
            Ok(())
        } else {
            Err(FabricError::DeregistrationFailed(format!("unknown service id {id}")))
        }
    }

    async fn update_ttl(&self, check_id: &str, _note: &str, status: &str) -> Result<()> {
        let id = check_id.strip_prefix("service:").unwrap_or(check_id);
        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.status = status.to_string();
                Ok(())
            }
            None => Err(FabricError::RegistrationFailed(format!("no such check id {check_id}"))),
        }
    }

    async fn query_service(
        &self,
        name: &str,
        wait_index: u64,
        wait_time: Duration,
    ) -> Result<QueryResult> {
        let current = self.index.load(Ordering::Acquire);
        if current != wait_index {
            return Ok(QueryResult { services: self.snapshot(name), last_index: current });
        }

        let notified = self.notify.notified();
        let _ = tokio::time::timeout(wait_time, notified).await;

        Ok(QueryResult {
            services: self.snapshot(name),
            last_index: self.index.load(Ordering::Acquire),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_query_returns_the_service() {
        let catalog = InProcessCatalog::new();
        catalog
            .register_service(
                "n1",
                "fabric",
                "10.0.0.1",
                9000,
                vec!["role:worker".into()],
                HashMap::new(),
                Duration::from_secs(10),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let result = catalog.query_service("fabric", 0, Duration::from_millis(50)).await.unwrap();
        assert_eq!(result.services.len(), 1);
        assert_eq!(result.services[0].id, "n1");
    }

    #[tokio::test]
    async fn query_with_current_index_blocks_until_change_or_timeout() {
        let catalog = InProcessCatalog::new();
        let start_index = catalog.index.load(Ordering::Acquire);

        let result = catalog
            .query_service("fabric", start_index, Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(result.last_index, start_index);
        assert!(result.services.is_empty());
    }

    #[tokio::test]
    async fn deregister_unknown_service_fails() {
        let catalog = InProcessCatalog::new();
        assert!(catalog.deregister_service("ghost").await.is_err());
    }

    #[tokio::test]
    async fn update_ttl_strips_service_prefix() {
        let catalog = InProcessCatalog::new();
        catalog
            .register_service("n1", "fabric", "10.0.0.1", 9000, vec![], HashMap::new(), Duration::from_secs(10), Duration::from_secs(60))
            .await
            .unwrap();
        catalog.update_ttl("service:n1", "ok", "passing").await.unwrap();
        assert!(catalog.update_ttl("service:ghost", "ok", "passing").await.is_err());
    }
}
