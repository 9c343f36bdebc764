//! Round-robin policy (spec section 4.D): a single atomic counter, no
//! lock on the hot path. `UpdateNodes` resets the counter to zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::clustering::node::{Node, NodeId};
use crate::error::{FabricError, Result};

use super::super::{available_nodes, LoadBalancer, NodeStats, RequestFingerprint};

pub struct RoundRobinBalancer {
    nodes: RwLock<Vec<Node>>,
    counter: AtomicUsize,
    stats: RwLock<std::collections::HashMap<String, NodeStats>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
            stats: RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select_node(&self, _req: &RequestFingerprint) -> Result<Node> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return Err(FabricError::NoAvailableNodes);
        }
        let idx = (self.counter.fetch_add(1, Ordering::Relaxed) + 1) % nodes.len();
        let selected = nodes[idx].clone();
        drop(nodes);

        let mut stats = self.stats.write();
        stats.entry(selected.id.as_str().to_string()).or_insert_with(|| NodeStats {
            node_id: selected.id.as_str().to_string(),
            ..Default::default()
        }).total_selections += 1;

        Ok(selected)
    }

    async fn update_nodes(&self, nodes: Vec<Node>) {
        let live = available_nodes(&nodes);
        let mut current = self.nodes.write();
        *current = live;
        self.counter.store(0, Ordering::Relaxed);

        let live_ids: std::collections::HashSet<String> =
            current.iter().map(|n| n.id.as_str().to_string()).collect();
        let mut stats = self.stats.write();
        stats.retain(|id, _| live_ids.contains(id));
        for node in current.iter() {
            stats.entry(node.id.as_str().to_string()).or_insert_with(|| NodeStats {
                node_id: node.id.as_str().to_string(),
                ..Default::default()
            });
        }
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
            entry.avg_latency_ms = if entry.total_selections <= 1 {
                ms
            } else {
                entry.avg_latency_ms * 0.8 + ms * 0.2
            };
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

    fn node(id: &str) -> Node {
        Node::new(NodeId::new(id), id, "127.0.0.1", 8080).with_roles([NodeRole::Worker])
    }

    fn fingerprint() -> RequestFingerprint {
        RequestFingerprint::new("r1", super::super::super::RequestType::Generic)
    }

    #[tokio::test]
    async fn rotates_gap_free_across_the_slice() {
        let balancer = RoundRobinBalancer::new();
        balancer.update_nodes(vec![node("a"), node("b"), node("c")]).await;

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(balancer.select_node(&fingerprint()).await.unwrap().id.as_str().to_string());
        }
        assert_eq!(seen, vec!["b", "c", "a", "b"]);
    }

    #[tokio::test]
    async fn empty_set_yields_no_available_nodes() {
        let balancer = RoundRobinBalancer::new();
        assert!(matches!(
            balancer.select_node(&fingerprint()).await,
            Err(FabricError::NoAvailableNodes)
        ));
    }

    #[tokio::test]
    async fn update_nodes_resets_counter() {
        let balancer = RoundRobinBalancer::new();
        balancer.update_nodes(vec![node("a"), node("b")]).await;
        balancer.select_node(&fingerprint()).await.unwrap();
        balancer.update_nodes(vec![node("a"), node("b")]).await;
        let first = balancer.select_node(&fingerprint()).await.unwrap();
        assert_eq!(first.id, NodeId::new("b"));
    }

    #[tokio::test]
    async fn record_result_against_unknown_node_is_noop() {
        let balancer = RoundRobinBalancer::new();
        balancer.update_nodes(vec![node("a")]).await;
        balancer.record_result(&NodeId::new("ghost"), true, Duration::from_millis(5)).await;
        assert!(balancer.get_stats().await.iter().all(|s| s.node_id != "ghost"));
    }
}
