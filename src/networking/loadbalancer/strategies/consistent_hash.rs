//! Consistent-hash policy (spec section 4.D): a sorted ring of virtual
//! keys per node, rebuilt wholesale on `update_nodes`. A read lock
//! covers `select_node`; a write lock covers rebuild.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::clustering::node::{Node, NodeId};
use crate::error::{FabricError, Result};

use super::super::{available_nodes, LoadBalancer, NodeStats, RequestFingerprint};

const VIRTUAL_NODES: u32 = 150;

fn md5_hash_u32(data: &str) -> u32 {
    let digest = md5::compute(data.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

struct Ring {
    keys: BTreeMap<u32, String>,
    nodes: Vec<Node>,
}

impl Ring {
    fn empty() -> Self {
        Self { keys: BTreeMap::new(), nodes: Vec::new() }
    }

    fn build(nodes: Vec<Node>) -> Self {
        let mut keys = BTreeMap::new();
        for node in &nodes {
            for i in 0..VIRTUAL_NODES {
                let hash = md5_hash_u32(&format!("{}#{}", node.id.as_str(), i));
                keys.insert(hash, node.id.as_str().to_string());
            }
        }
        Self { keys, nodes }
    }

    /// First ring key >= hash, wrapping to the smallest key past the end.
    fn lookup(&self, hash: u32) -> Option<&str> {
        self.keys
            .range(hash..)
            .next()
            .or_else(|| self.keys.iter().next())
            .map(|(_, id)| id.as_str())
    }

    fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }
}

pub struct ConsistentHashBalancer {
    ring: RwLock<Ring>,
    stats: RwLock<std::collections::HashMap<String, NodeStats>>,
}

impl ConsistentHashBalancer {
    pub fn new() -> Self {
        Self { ring: RwLock::new(Ring::empty()), stats: RwLock::new(std::collections::HashMap::new()) }
    }
}

impl Default for ConsistentHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for ConsistentHashBalancer {
    async fn select_node(&self, req: &RequestFingerprint) -> Result<Node> {
        let ring = self.ring.read();
        if ring.nodes.is_empty() {
            return Err(FabricError::NoAvailableNodes);
        }
        let hash = md5_hash_u32(req.hash_key());
        let node_id = ring.lookup(hash).expect("ring non-empty checked above");
        let node = ring.node(node_id).expect("ring key always maps to a known node").clone();
        drop(ring);

        let mut stats = self.stats.write();
        stats
            .entry(node.id.as_str().to_string())
            .or_insert_with(|| NodeStats { node_id: node.id.as_str().to_string(), ..Default::default() })
            .total_selections += 1;

        Ok(node)
    }

    async fn update_nodes(&self, nodes: Vec<Node>) {
        let live = available_nodes(&nodes);
        let live_ids: std::collections::HashSet<String> =
            live.iter().map(|n| n.id.as_str().to_string()).collect();
        *self.ring.write() = Ring::build(live);

        let mut stats = self.stats.write();
        stats.retain(|id, _| live_ids.contains(id));
    }

    async fn record_result(&self, node_id: &NodeId, ok: bool, latency: Duration) {
        let mut stats = self.stats.write();
        if let Some(entry) = stats.get_mut(node_id.as_str()) {
            if ok {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
            let ms = latency.as_secs_f64() * 1000.0;
            entry.avg_latency_ms = if entry.total_selections <= 1 { ms } else { entry.avg_latency_ms * 0.8 + ms * 0.2 };
        }
    }

    async fn get_stats(&self) -> Vec<NodeStats> {
        self.stats.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::node::NodeRole;
    use crate::networking::loadbalancer::RequestType;

    fn node(id: &str) -> Node {
        Node::new(NodeId::new(id), id, "127.0.0.1", 8080).with_roles([NodeRole::Worker])
    }

    #[tokio::test]
    async fn identical_key_always_maps_to_same_node_while_set_is_stable() {
        let balancer = ConsistentHashBalancer::new();
        balancer.update_nodes(vec![node("a"), node("b"), node("c")]).await;

        let req = RequestFingerprint::new("r1", RequestType::Retrieval).with_user_id("user-42");
        let first = balancer.select_node(&req).await.unwrap();
        for _ in 0..5 {
            let again = balancer.select_node(&req).await.unwrap();
            assert_eq!(again.id, first.id);
        }
    }

    #[tokio::test]
    async fn user_id_takes_precedence_over_request_id() {
        let balancer = ConsistentHashBalancer::new();
        balancer.update_nodes(vec![node("a"), node("b")]).await;

        let req_a = RequestFingerprint::new("r1", RequestType::Retrieval).with_user_id("shared-key");
        let req_b = RequestFingerprint::new("r2", RequestType::Retrieval).with_user_id("shared-key");
        let selected_a = balancer.select_node(&req_a).await.unwrap();
        let selected_b = balancer.select_node(&req_b).await.unwrap();
        assert_eq!(selected_a.id, selected_b.id);
    }

    #[tokio::test]
    async fn empty_ring_yields_no_available_nodes() {
        let balancer = ConsistentHashBalancer::new();
        let req = RequestFingerprint::new("r1", RequestType::Generic);
        assert!(matches!(balancer.select_node(&req).await, Err(FabricError::NoAvailableNodes)));
    }
}
