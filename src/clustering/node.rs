//! Node model — the fundamental cluster entity.
//!
//! A [`Node`] carries identity, status, roles, declared capacity, observed
//! load, and location metadata. [`NodeFilter`] composes predicates over a
//! node set as a logical AND of whichever clauses are non-empty.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FabricError, Result};

/// Opaque, stable node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Node operational status. Only `Online` and `Busy` are selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
    Draining,
    Maintenance,
}

/// A role a node may hold; a node may hold several simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Master,
    Worker,
    Cache,
    Gateway,
}

/// Declared upper bounds on a node's capacity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capacity {
    pub max_connections: u32,
    pub max_qps: u32,
    pub max_memory_mb: u32,
    pub max_goroutines: Option<u32>,
    pub max_disk_mb: Option<u64>,
}

/// Observed current load on a node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Load {
    pub current_connections: u32,
    pub cpu_usage_percent: f32,
    pub memory_usage_mb: u32,
    pub qps: f32,
    pub disk_usage_mb: Option<u64>,
    pub network_usage_mbps: Option<f32>,
}

/// Region/zone placement plus free-form metadata (version, name hints,
/// capacity hints carried through discovery).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    pub region: String,
    pub zone: String,
    pub metadata: HashMap<String, String>,
}

/// A cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub status: NodeStatus,
    pub roles: Vec<NodeRole>,
    pub capacity: Capacity,
    pub load: Load,
    pub location: Location,
    pub registered_at: u64,
    pub last_seen: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let ts = now_secs();
        Self {
            id,
            name: name.into(),
            address: address.into(),
            port,
            status: NodeStatus::Online,
            roles: Vec::new(),
            capacity: Capacity::default(),
            load: Load::default(),
            location: Location::default(),
            registered_at: ts,
            last_seen: ts,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = NodeRole>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    /// Available iff status is Online or Busy.
    pub fn is_available(&self) -> bool {
        matches!(self.status, NodeStatus::Online | NodeStatus::Busy)
    }

    /// Healthy iff available and under capacity on connections, memory,
    /// and CPU (<=95%). Undeclared (zero) capacity bounds are unbounded.
    pub fn is_healthy(&self) -> bool {
        if !self.is_available() {
            return false;
        }
        let conn_ok = self.capacity.max_connections == 0
            || self.load.current_connections < self.capacity.max_connections;
        let mem_ok = self.capacity.max_memory_mb == 0
            || self.load.memory_usage_mb < self.capacity.max_memory_mb;
        let cpu_ok = self.load.cpu_usage_percent <= 95.0;
        conn_ok && mem_ok && cpu_ok
    }

    /// Percentage of declared connection capacity in use; 0 when capacity
    /// is undeclared.
    pub fn load_percent(&self) -> f64 {
        if self.capacity.max_connections == 0 {
            0.0
        } else {
            (self.load.current_connections as f64 / self.capacity.max_connections as f64) * 100.0
        }
    }

    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn touch(&mut self) {
        self.last_seen = now_secs();
    }

    /// Validate required fields before a node may be registered.
    pub fn validate(&self) -> Result<()> {
        if self.id.0.trim().is_empty() {
            return Err(FabricError::InvalidRequest("node id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(FabricError::InvalidRequest("node name must not be empty".into()));
        }
        if self.address.trim().is_empty() {
            return Err(FabricError::InvalidRequest("node address must not be empty".into()));
        }
        if self.port == 0 {
            return Err(FabricError::InvalidRequest("node port must be in [1,65535]".into()));
        }
        if self.roles.is_empty() {
            return Err(FabricError::InvalidRequest("node must hold at least one role".into()));
        }
        Ok(())
    }
}

/// Composable predicate over a node set. Clauses combine as logical AND;
/// an empty filter (all `None`/empty) matches every node.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub statuses: Vec<NodeStatus>,
    pub roles: Vec<NodeRole>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub min_capacity: Option<Capacity>,
    pub max_load: Option<Load>,
    pub metadata: HashMap<String, String>,
    pub healthy_only: bool,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self, node: &Node) -> bool {
        if self.healthy_only && !node.is_healthy() {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&node.status) {
            return false;
        }
        if !self.roles.is_empty() && !self.roles.iter().any(|r| node.roles.contains(r)) {
            return false;
        }
        if let Some(region) = &self.region {
            if &node.location.region != region {
                return false;
            }
        }
        if let Some(zone) = &self.zone {
            if &node.location.zone != zone {
                return false;
            }
        }
        if let Some(min) = &self.min_capacity {
            if node.capacity.max_connections < min.max_connections
                || node.capacity.max_qps < min.max_qps
                || node.capacity.max_memory_mb < min.max_memory_mb
            {
                return false;
            }
        }
        if let Some(max) = &self.max_load {
            if node.load.current_connections > max.current_connections
                || node.load.cpu_usage_percent > max.cpu_usage_percent
                || node.load.memory_usage_mb > max.memory_usage_mb
            {
                return false;
            }
        }
        for (k, v) in &self.metadata {
            match node.location.metadata.get(k) {
                Some(actual) if actual == v => {}
                _ => return false,
            }
        }
        true
    }

    pub fn apply<'a>(&self, nodes: &'a [Node]) -> Vec<&'a Node> {
        nodes.iter().filter(|n| self.matches(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, conns: u32, max: u32, cpu: f32) -> Node {
        let mut n = Node::new(NodeId::new(id), id, "127.0.0.1", 8080).with_roles([NodeRole::Worker]);
        n.capacity.max_connections = max;
        n.load.current_connections = conns;
        n.load.cpu_usage_percent = cpu;
        n
    }

    #[test]
    fn available_requires_online_or_busy() {
        let mut n = node("a", 0, 100, 0.0);
        assert!(n.is_available());
        n.status = NodeStatus::Draining;
        assert!(!n.is_available());
        n.status = NodeStatus::Busy;
        assert!(n.is_available());
    }

    #[test]
    fn healthy_requires_capacity_headroom_and_cpu_bound() {
        let healthy = node("a", 50, 100, 50.0);
        assert!(healthy.is_healthy());

        let full = node("a", 100, 100, 50.0);
        assert!(!full.is_healthy());

        let hot = node("a", 10, 100, 96.0);
        assert!(!hot.is_healthy());

        // capacity undeclared => unbounded
        let uncapped = node("a", 10_000, 0, 10.0);
        assert!(uncapped.is_healthy());
    }

    #[test]
    fn load_percent_zero_when_capacity_undeclared() {
        let n = node("a", 10, 0, 0.0);
        assert_eq!(n.load_percent(), 0.0);
        let n2 = node("a", 50, 100, 0.0);
        assert_eq!(n2.load_percent(), 50.0);
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let mut n = Node::new(NodeId::new(""), "x", "127.0.0.1", 8080).with_roles([NodeRole::Worker]);
        assert!(n.validate().is_err());
        n.id = NodeId::new("ok");
        assert!(n.validate().is_ok());
        n.roles.clear();
        assert!(n.validate().is_err());
    }

    #[test]
    fn filter_composes_as_and() {
        let a = node("a", 10, 100, 10.0);
        let mut b = node("b", 10, 100, 10.0);
        b.location.region = "eu".into();

        let nodes = vec![a.clone(), b.clone()];
        let filter = NodeFilter {
            region: Some("eu".into()),
            roles: vec![NodeRole::Worker],
            ..Default::default()
        };
        let matched = filter.apply(&nodes);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, b.id);
    }

    #[test]
    fn empty_filter_matches_all() {
        let nodes = vec![node("a", 0, 0, 0.0), node("b", 0, 0, 0.0)];
        let filter = NodeFilter::new();
        assert_eq!(filter.apply(&nodes).len(), 2);
    }
}
