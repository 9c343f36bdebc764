//! Adaptive policy (spec section 4.D): scores nodes from a live
//! resource snapshot plus a sliding window of outcome/latency samples.
//! Writes (sample ingestion, score recompute) take a per-node slot;
//! reads take only a read lock over the whole set.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::clustering::node::{Node, NodeId};
use crate::error::{FabricError, Result};

use super::super::{available_nodes, LoadBalancer, NodeStats, RequestFingerprint};

const WINDOW_SIZE: usize = 100;

#[derive(Clone, Copy)]
struct Sample {
    success: bool,
    latency: Duration,
}

struct Entry {
    node: Node,
    samples: VecDeque<Sample>,
    stats: NodeStats,
}

impl Entry {
    fn score(&self) -> f64 {
        let cpu_term = 1.0 - (self.node.load.cpu_usage_percent as f64 / 100.0).clamp(0.0, 1.0);

        let memory_term = if self.node.capacity.max_memory_mb == 0 {
            0.0
        } else {
            1.0 - (self.node.load.memory_usage_mb as f64 / self.node.capacity.max_memory_mb as f64).clamp(0.0, 1.0)
        };

        let connection_term = if self.node.capacity.max_connections == 0 {
            0.0
        } else {
            1.0 - (self.node.load.current_connections as f64 / self.node.capacity.max_connections as f64).clamp(0.0, 1.0)
        };

        let success_term = if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().filter(|s| s.success).count() as f64 / self.samples.len() as f64
        };

        let latency_term = if self.samples.is_empty() {
            0.0
        } else {
            let avg_secs = self.samples.iter().map(|s| s.latency.as_secs_f64()).sum::<f64>() / self.samples.len() as f64;
            (1.0 - avg_secs).max(0.0).min(1.0).max(if avg_secs >= 1.0 { 0.1 } else { 0.0 })
        };

        0.30 * cpu_term + 0.20 * memory_term + 0.20 * connection_term + 0.15 * success_term + 0.15 * latency_term
    }

    fn push_sample(&mut self, success: bool, latency: Duration) {
        if self.samples.len() == WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { success, latency });
    }
}

pub struct AdaptiveBalancer {
    entries: RwLock<Vec<Entry>>,
}

impl AdaptiveBalancer {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()) }
    }
}

impl Default for AdaptiveBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for AdaptiveBalancer {
    async fn select_node(&self, _req: &RequestFingerprint) -> Result<Node> {
        let mut entries = self.entries.write();
        if entries.is_empty() {
            return Err(FabricError::NoAvailableNodes);
        }

        let mut best_idx = 0;
        let mut best_score = entries[0].score();
        for (i, entry) in entries.iter().enumerate().skip(1) {
            let score = entry.score();
            if score > best_score {
                best_idx = i;
                best_score = score;
            }
        }

        entries[best_idx].stats.total_selections += 1;
        Ok(entries[best_idx].node.clone())
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
                    None => Entry {
                        stats: NodeStats { node_id: id, ..Default::default() },
                        node,
                        samples: VecDeque::with_capacity(WINDOW_SIZE),
                    },
                }
            })
            .collect();
    }

    async fn record_result(&self, node_id: &NodeId, ok: bool, latency: Duration) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.node.id == *node_id) {
            entry.push_sample(ok, latency);
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
