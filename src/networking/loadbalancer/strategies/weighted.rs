//! Weighted policy (spec section 4.D): explicit or derived integer
//! weights, selected by drawing into [0, sum) and walking cumulative
//! weight. Stats live alongside node/weight in the same entry, so a
//! write lock covers `select_node` (it bumps `total_selections` on the
//! chosen entry) as well as `update_nodes`/`update_weights`.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;

use crate::clustering::node::{Node, NodeId};
use crate::error::{FabricError, Result};

use super::super::{available_nodes, LoadBalancer, NodeStats, RequestFingerprint};

fn derived_weight(node: &Node) -> u32 {
    let headroom = 1.0 - (node.load_percent() / 100.0).clamp(0.0, 1.0);
    ((node.capacity.max_connections as f64 * headroom).floor() as u32).max(1)
}

struct Entry {
    node: Node,
    weight: u32,
    stats: NodeStats,
}

pub struct WeightedBalancer {
    entries: RwLock<Vec<Entry>>,
}

impl WeightedBalancer {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()) }
    }

    /// Overrides weights by node order; rejects a length mismatch with
    /// the current node set.
    pub fn update_weights(&self, weights: Vec<u32>) -> Result<()> {
        let mut entries = self.entries.write();
        if weights.len() != entries.len() {
            return Err(FabricError::InvalidRequest(format!(
                "weight count {} does not match node count {}",
                weights.len(),
                entries.len()
            )));
        }
        for (entry, weight) in entries.iter_mut().zip(weights) {
            entry.weight = weight.max(1);
        }
        Ok(())
    }
}

impl Default for WeightedBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for WeightedBalancer {
    async fn select_node(&self, _req: &RequestFingerprint) -> Result<Node> {
        let mut entries = self.entries.write();
        if entries.is_empty() {
            return Err(FabricError::NoAvailableNodes);
        }

        let total: u32 = entries.iter().map(|e| e.weight).sum();
        let draw = if total == 0 { 0 } else { rand::thread_rng().gen_range(0..total) };

        let mut cumulative = 0u32;
        let mut idx = entries.len() - 1;
        for (i, entry) in entries.iter().enumerate() {
            cumulative += entry.weight;
            if draw < cumulative {
                idx = i;
                break;
            }
        }

        entries[idx].stats.total_selections += 1;
        Ok(entries[idx].node.clone())
    }

    async fn update_nodes(&self, nodes: Vec<Node>) {
        let live = available_nodes(&nodes);
        let mut entries = self.entries.write();

        let mut preserved: std::collections::HashMap<String, Entry> = entries
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
                    None => {
                        let weight = derived_weight(&node);
                        Entry { stats: NodeStats { node_id: id, ..Default::default() }, node, weight }
                    }
                }
            })
            .collect();
    }

    async fn record_result(&self, node_id: &NodeId, ok: bool, latency: Duration) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.node.id == *node_id) {
            if ok {
                entry.stats.successes += 1;
            } else {
                entry.stats.failures += 1;
            }
            let ms = latency.as_secs_f64() * 1000.0;
            entry.stats.avg_latency_ms = if entry.stats.total_selections <= 1 { ms } else { entry.stats.avg_latency_ms * 0.8 + ms * 0.2 };
        }
    }

    async fn get_stats(&self) -> Vec<NodeStats> {
        self.entries.read().iter().map(|e| e.stats.clone()).collect()
    }
}
