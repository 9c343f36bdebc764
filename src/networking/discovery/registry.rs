//! The public discovery surface: register/unregister/list/watch/heartbeat
//! against a [`ClusterCatalog`], diffing catalog snapshots into
//! [`NodeEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::clustering::node::{Node, NodeFilter, NodeId, NodeRole, NodeStatus};
use crate::error::{FabricError, Result};

use super::{check_id_for, encode_meta, encode_tags, CatalogService, ClusterCatalog, DiscoveryConfig, NodeEvent};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn decode_status(tags: &[String]) -> NodeStatus {
    for tag in tags {
        if let Some(s) = tag.strip_prefix("status:") {
            return match s {
                "online" => NodeStatus::Online,
                "busy" => NodeStatus::Busy,
                "draining" => NodeStatus::Draining,
                "maintenance" => NodeStatus::Maintenance,
                _ => NodeStatus::Offline,
            };
        }
    }
    NodeStatus::Offline
}

fn decode_roles(tags: &[String]) -> Vec<NodeRole> {
    tags.iter()
        .filter_map(|t| t.strip_prefix("role:"))
        .filter_map(|r| match r {
            "master" => Some(NodeRole::Master),
            "worker" => Some(NodeRole::Worker),
            "cache" => Some(NodeRole::Cache),
            "gateway" => Some(NodeRole::Gateway),
            _ => None,
        })
        .collect()
}

fn decode_service(service: &CatalogService) -> Node {
    let mut node = Node::new(NodeId::new(service.id.clone()), service.name.clone(), service.address.clone(), service.port);
    node.status = decode_status(&service.tags);
    node.roles = decode_roles(&service.tags);
    if let Some(region) = service.tags.iter().find_map(|t| t.strip_prefix("region:")) {
        node.location.region = region.to_string();
    }
    if let Some(zone) = service.tags.iter().find_map(|t| t.strip_prefix("zone:")) {
        node.location.zone = zone.to_string();
    }
    if let Some(conns) = service.meta.get("max_connections").and_then(|v| v.parse().ok()) {
        node.capacity.max_connections = conns;
    }
    if let Some(qps) = service.meta.get("max_qps").and_then(|v| v.parse().ok()) {
        node.capacity.max_qps = qps;
    }
    if let Some(mem) = service.meta.get("max_memory_mb").and_then(|v| v.parse().ok()) {
        node.capacity.max_memory_mb = mem;
    }
    node.touch();
    node
}

/// Compares two decoded snapshots for the "updated" fields named in
/// spec section 4.B: status, address, port, or role sequence.
fn changed(old: &Node, new: &Node) -> bool {
    old.status != new.status || old.address != new.address || old.port != new.port || old.roles != new.roles
}

/// Discovery registry backed by a [`ClusterCatalog`].
pub struct Registry {
    config: DiscoveryConfig,
    catalog: Arc<dyn ClusterCatalog>,
    known: Mutex<HashMap<String, Node>>,
    last_index: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl Registry {
    pub fn new(config: DiscoveryConfig, catalog: Arc<dyn ClusterCatalog>) -> Self {
        Self {
            config,
            catalog,
            known: Mutex::new(HashMap::new()),
            last_index: AtomicU64::new(0),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(FabricError::DiscoveryNotAvailable)
        } else {
            Ok(())
        }
    }

    /// Registers a node, then immediately issues a passing TTL update so
    /// it is never briefly visible as critical to other watchers.
    pub async fn register_node(&self, node: &Node) -> Result<()> {
        self.ensure_open()?;
        node.validate()?;

        self.catalog
            .register_service(
                node.id.as_str(),
                &node.name,
                &node.address,
                node.port,
                encode_tags(node),
                encode_meta(node),
                self.config.ttl,
                self.config.deregister_after,
            )
            .await
            .map_err(|e| FabricError::RegistrationFailed(e.to_string()))?;

        self.catalog
            .update_ttl(&check_id_for(node.id.as_str()), "registered", "passing")
            .await
            .map_err(|e| FabricError::RegistrationFailed(e.to_string()))?;

        self.known.lock().insert(node.id.as_str().to_string(), node.clone());
        Ok(())
    }

    pub async fn unregister_node(&self, node_id: &NodeId) -> Result<()> {
        self.ensure_open()?;
        self.catalog
            .deregister_service(node_id.as_str())
            .await
            .map_err(|e| FabricError::DeregistrationFailed(e.to_string()))?;
        self.known.lock().remove(node_id.as_str());
        Ok(())
    }

    pub async fn get_node(&self, node_id: &NodeId) -> Result<Node> {
        self.ensure_open()?;
        self.known
            .lock()
            .get(node_id.as_str())
            .cloned()
            .ok_or_else(|| FabricError::NodeNotFound(node_id.as_str().to_string()))
    }

    pub async fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        self.ensure_open()?;
        let result = self
            .catalog
            .query_service(&self.config.service_name, 0, self.config.watch_wait_time)
            .await?;
        let nodes: Vec<Node> = result.services.iter().map(decode_service).collect();
        Ok(filter.apply(&nodes).into_iter().cloned().collect())
    }

    /// Maps to a TTL update, per spec section 4.B.
    pub async fn heartbeat(&self, node_id: &NodeId) -> Result<()> {
        self.ensure_open()?;
        self.catalog
            .update_ttl(&check_id_for(node_id.as_str()), "heartbeat", "passing")
            .await
    }

    /// Spawns the single background long-poll worker and returns a
    /// stream of diffed [`NodeEvent`]s. Dropping the returned stream
    /// does not stop the worker; call [`Registry::close`] for that.
    pub fn watch(self: &Arc<Self>) -> UnboundedReceiverStream<NodeEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut wait_index = 0u64;
            loop {
                if registry.closed.load(Ordering::Acquire) {
                    break;
                }

                let query = registry
                    .catalog
                    .query_service(&registry.config.service_name, wait_index, registry.config.watch_wait_time)
                    .await;

                let result = match query {
                    Ok(r) => r,
                    Err(_) => {
                        tokio::time::sleep(registry.config.error_backoff).await;
                        continue;
                    }
                };

                wait_index = result.last_index;
                let timestamp = now_secs();
                let fresh: HashMap<String, Node> =
                    result.services.iter().map(|s| (s.id.clone(), decode_service(s))).collect();

                let mut known = registry.known.lock();
                for (id, node) in fresh.iter() {
                    match known.get(id) {
                        None => {
                            if tx.send(NodeEvent::Joined { node: node.clone(), timestamp }).is_err() {
                                return;
                            }
                        }
                        Some(old) if changed(old, node) => {
                            if tx.send(NodeEvent::Updated { node: node.clone(), timestamp }).is_err() {
                                return;
                            }
                        }
                        _ => {}
                    }
                }
                let left_ids: Vec<String> =
                    known.keys().filter(|id| !fresh.contains_key(*id)).cloned().collect();
                for id in left_ids {
                    if let Some(node) = known.remove(&id) {
                        if tx.send(NodeEvent::Left { node, timestamp }).is_err() {
                            return;
                        }
                    }
                }
                *known = fresh;
            }
        });

        UnboundedReceiverStream::new(rx)
    }

    /// Idempotent. After close, all operations fail with
    /// `DiscoveryNotAvailable` and the watch worker exits at its next
    /// loop iteration.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::discovery::InProcessCatalog;
    use futures_util::StreamExt;

    fn node(id: &str) -> Node {
        Node::new(NodeId::new(id), id, "127.0.0.1", 9000).with_roles([NodeRole::Worker])
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = Registry::new(DiscoveryConfig::default(), Arc::new(InProcessCatalog::new()));
        let n = node("a");
        registry.register_node(&n).await.unwrap();
        let fetched = registry.get_node(&n.id).await.unwrap();
        assert_eq!(fetched.id, n.id);
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let registry = Registry::new(DiscoveryConfig::default(), Arc::new(InProcessCatalog::new()));
        registry.close();
        assert!(matches!(
            registry.register_node(&node("a")).await,
            Err(FabricError::DiscoveryNotAvailable)
        ));
    }

    #[tokio::test]
    async fn unregister_unknown_node_surfaces_deregistration_failed() {
        let registry = Registry::new(DiscoveryConfig::default(), Arc::new(InProcessCatalog::new()));
        let result = registry.unregister_node(&NodeId::new("ghost")).await;
        assert!(matches!(result, Err(FabricError::DeregistrationFailed(_))));
    }

    #[tokio::test]
    async fn watch_emits_joined_then_left() {
        let mut config = DiscoveryConfig::default();
        config.watch_wait_time = std::time::Duration::from_millis(50);
        let registry = Arc::new(Registry::new(config, Arc::new(InProcessCatalog::new())));

        let mut stream = registry.watch();

        let n = node("a");
        registry.register_node(&n).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, NodeEvent::Joined { .. }));

        registry.unregister_node(&n.id).await.unwrap();
        let second = stream.next().await.unwrap();
        assert!(matches!(second, NodeEvent::Left { .. }));

        registry.close();
    }
}
