//! Load balancers: five policies over a live node set (spec section 4.D).
//!
//! Every policy implements [`LoadBalancer`]. Concurrency rules differ
//! per policy (spec section 5) and are documented on each
//! implementation rather than here.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clustering::node::{Node, NodeId};
use crate::error::Result;

pub mod circuit_breaker;
pub mod strategies;

pub use strategies::{
    AdaptiveBalancer, ConsistentHashBalancer, LeastConnectionBalancer, RoundRobinBalancer,
    WeightedBalancer,
};

/// Request classes a fingerprint may carry; only `retrieval`/`embedding`
/// traffic is expected to set a `user_id` for consistent-hash routing,
/// but any type may.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Llm,
    Retrieval,
    Embedding,
    Generic,
}

/// Opaque request descriptor load balancers select against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub id: String,
    pub request_type: RequestType,
    pub payload_size: usize,
    /// 0 (lowest) .. 10 (highest).
    pub priority: u8,
    /// Hash key for consistent-hash routing when present; `id` is used
    /// otherwise.
    pub user_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl RequestFingerprint {
    pub fn new(id: impl Into<String>, request_type: RequestType) -> Self {
        Self {
            id: id.into(),
            request_type,
            payload_size: 0,
            priority: 0,
            user_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// The key consistent-hash routing hashes: `user_id` if present,
    /// else `id`.
    pub fn hash_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.id)
    }
}

/// Per-node statistics a balancer owns and never hands out by
/// reference; `GetStats` returns an owned snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: String,
    pub active_connections: u32,
    pub total_selections: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

/// The shared load-balancer contract (spec section 4.D). `select_node`
/// returns `NoAvailableNodes` when the live set is empty; recording
/// against an unknown node id is a silent no-op.
#[async_trait::async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn select_node(&self, req: &RequestFingerprint) -> Result<Node>;
    async fn update_nodes(&self, nodes: Vec<Node>);
    async fn record_result(&self, node_id: &NodeId, ok: bool, latency: Duration);
    async fn get_stats(&self) -> Vec<NodeStats>;
}

/// Which policy a [`LoadBalancer`] trait object implements; mainly
/// useful for config-driven construction and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalancingPolicy {
    RoundRobin,
    LeastConnection,
    Weighted,
    ConsistentHash,
    Adaptive,
}

/// Filters a node slice down to the selectable set per spec section 4.D
/// ("filters to healthy+available nodes before installing") and the
/// testable property that every returned node is Available AND Healthy
/// at selection time. `Node::is_healthy` already implies availability.
pub(crate) fn available_nodes(nodes: &[Node]) -> Vec<Node> {
    nodes.iter().filter(|n| n.is_healthy()).cloned().collect()
}
