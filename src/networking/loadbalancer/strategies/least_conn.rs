//! Least-connection policy (spec section 4.D): a single lock guards
//! node order and connection counts together, since selection reads
//! and writes the count atomically with the choice.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::clustering::node::{Node, NodeId};
use crate::error::{FabricError, Result};

use super::super::{available_nodes, LoadBalancer, NodeStats, RequestFingerprint};

struct Entry {
    node: Node,
    connections: u32,
    stats: NodeStats,
}

pub struct LeastConnectionBalancer {
    entries: RwLock<Vec<Entry>>,
}

impl LeastConnectionBalancer {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()) }
    }
}

impl Default for LeastConnectionBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for LeastConnectionBalancer {
    async fn select_node(&self, _req: &RequestFingerprint) -> Result<Node> {
        let mut entries = self.entries.write();
        if entries.is_empty() {
            return Err(FabricError::NoAvailableNodes);
        }

        let min_idx = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.connections)
            .map(|(i, _)| i)
            .expect("non-empty checked above");

        entries[min_idx].connections += 1;
        entries[min_idx].stats.active_connections = entries[min_idx].connections;
        entries[min_idx].stats.total_selections += 1;
        Ok(entries[min_idx].node.clone())
    }

    async fn update_nodes(&self, nodes: Vec<Node>) {
        let live = available_nodes(&nodes);
        let mut entries = self.entries.write();

        let mut preserved: HashMap<String, Entry> = entries
            .drain(..)
            .map(|e| (e.node.id.as_str().to_string(), e))
            .collect();

        *entries = live
            .into_iter()
            .map(|node| {
                let id = node.id.as_str().to_string();
                match preserved.remove(&id) {
                    Some(mut existing) => {
                        existing.node = node;
                        existing
                    }
                    None => Entry {
                        stats: NodeStats { node_id: id, ..Default::default() },
                        node,
                        connections: 0,
                    },
                }
            })
            .collect();
    }

    async fn record_result(&self, node_id: &NodeId, ok: bool, latency: Duration) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.node.id == *node_id) {
            if entry.connections > 0 {
                entry.connections -= 1;
            }
            entry.stats.active_connections = entry.connections;
            if ok {
                entry.stats.successes += 1;
            } else {
                entry.stats.failures += 1;
            }
            let ms = latency.as_secs_f64() * 1000.0;
            entry.stats.avg_latency_ms = if entry.stats.total_selections <= 1 {
                ms
            } else {
                entry.stats.avg_latency_ms * 0.8 + ms * 0.2
            };
        }
    }

    async fn get_stats(&self) -> Vec<NodeStats> {
        self.entries.read().iter().map(|e| e.stats.clone()).collect()
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

    fn fingerprint() -> RequestFingerprint {
        RequestFingerprint::new("r1", RequestType::Generic)
    }

    #[tokio::test]
    async fn picks_minimum_count_breaking_ties_by_iteration_order() {
        let balancer = LeastConnectionBalancer::new();
        balancer.update_nodes(vec![node("a"), node("b")]).await;

        let first = balancer.select_node(&fingerprint()).await.unwrap();
        assert_eq!(first.id, NodeId::new("a"));

        let second = balancer.select_node(&fingerprint()).await.unwrap();
        assert_eq!(second.id, NodeId::new("b"));
    }

    #[tokio::test]
    async fn record_result_decrements_never_below_zero() {
        let balancer = LeastConnectionBalancer::new();
        balancer.update_nodes(vec![node("a")]).await;
        balancer.record_result(&NodeId::new("a"), true, Duration::from_millis(1)).await;
        let stats = balancer.get_stats().await;
        assert_eq!(stats[0].active_connections, 0);
    }
}
