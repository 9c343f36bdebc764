//! Service discovery (spec section 4.B): register/unregister nodes,
//! watch for changes, and heartbeat against an external catalog.
//!
//! The catalog itself ([`catalog::ClusterCatalog`]) is a collaborator,
//! not something this module implements; [`registry::Registry`] is the
//! public surface callers use, translating node operations into catalog
//! tag/metadata encoding and diffing catalog snapshots into
//! [`NodeEvent`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clustering::node::Node;

pub mod catalog;
pub mod registry;

pub use catalog::{CatalogService, ClusterCatalog, InProcessCatalog, QueryResult};
pub use registry::Registry;

/// What changed about a node, surfaced on the [`registry::Registry::watch`] stream.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Joined { node: Node, timestamp: u64 },
    Left { node: Node, timestamp: u64 },
    Updated { node: Node, timestamp: u64 },
    Failed { node: Node, timestamp: u64 },
    Recovered { node: Node, timestamp: u64 },
}

impl NodeEvent {
    pub fn node(&self) -> &Node {
        match self {
            NodeEvent::Joined { node, .. }
            | NodeEvent::Left { node, .. }
            | NodeEvent::Updated { node, .. }
            | NodeEvent::Failed { node, .. }
            | NodeEvent::Recovered { node, .. } => node,
        }
    }
}

/// Configuration for the discovery registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Logical service name all fabric nodes register under.
    pub service_name: String,
    /// TTL the catalog uses to consider a registration stale.
    pub ttl: Duration,
    /// How long after TTL expiry the catalog deregisters the entry.
    pub deregister_after: Duration,
    /// Bound on a single long-poll `Watch` round-trip.
    pub watch_wait_time: Duration,
    /// Backoff after a transient catalog error in the watch loop.
    pub error_backoff: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_name: "fabric".to_string(),
            ttl: Duration::from_secs(10),
            deregister_after: Duration::from_secs(60),
            watch_wait_time: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Encodes a node's role/status/location into catalog tags, per the
/// wire encoding in spec section 6.
pub(crate) fn encode_tags(node: &Node) -> Vec<String> {
    let mut tags: Vec<String> = node.roles.iter().map(|r| format!("role:{r:?}").to_lowercase()).collect();
    tags.push(format!("status:{:?}", node.status).to_lowercase());
    if !node.location.region.is_empty() {
        tags.push(format!("region:{}", node.location.region));
    }
    if !node.location.zone.is_empty() {
        tags.push(format!("zone:{}", node.location.zone));
    }
    tags
}

pub(crate) fn encode_meta(node: &Node) -> std::collections::HashMap<String, String> {
    let mut meta = std::collections::HashMap::new();
    meta.insert("name".to_string(), node.name.clone());
    meta.insert("max_connections".to_string(), node.capacity.max_connections.to_string());
    meta.insert("max_qps".to_string(), node.capacity.max_qps.to_string());
    meta.insert("max_memory_mb".to_string(), node.capacity.max_memory_mb.to_string());
    if let Some(version) = node.location.metadata.get("version") {
        meta.insert("version".to_string(), version.clone());
    }
    meta
}

pub(crate) fn check_id_for(node_id: &str) -> String {
    format!("service:{node_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::node::{NodeId, NodeRole};

    #[test]
    fn encode_tags_includes_role_and_status() {
        let node = Node::new(NodeId::new("n1"), "n1", "10.0.0.1", 9000).with_roles([NodeRole::Worker]);
        let tags = encode_tags(&node);
        assert!(tags.contains(&"role:worker".to_string()));
        assert!(tags.contains(&"status:online".to_string()));
    }

    #[test]
    fn check_id_concatenates_service_prefix() {
        assert_eq!(check_id_for("n1"), "service:n1");
    }

    #[test]
    fn encode_meta_forwards_version_hint_when_present() {
        let mut node = Node::new(NodeId::new("n1"), "n1", "10.0.0.1", 9000).with_roles([NodeRole::Worker]);
        node.location.metadata.insert("version".to_string(), "1.2.3".to_string());
        let meta = encode_meta(&node);
        assert_eq!(meta.get("version"), Some(&"1.2.3".to_string()));
        assert_eq!(meta.get("name"), Some(&"n1".to_string()));
    }
}
