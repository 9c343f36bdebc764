//! Rebalance plans produced by a pluggable [`RebalanceStrategy`].
//!
//! The failover manager's auto-rebalance loop (spec section 4.F) delegates
//! the actual work of deciding what to move to a strategy implementor; this
//! module only defines the plan shape and a trivial no-op strategy used in
//! tests and as a safe default.

use serde::{Deserialize, Serialize};

use crate::clustering::node::{Node, NodeId};

/// What kind of resource a migration step moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    CacheShard,
    VectorPartition,
    Connections,
}

/// A single planned move of resources from one node to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub from: NodeId,
    pub to: NodeId,
    pub resource_type: ResourceType,
    pub resource_ids: Vec<String>,
    pub priority: u8,
}

/// Produces a rebalance plan from the current node set. Implementors
/// decide what "balanced" means for their resource; this crate only
/// schedules the call and surfaces the resulting plan via alerts.
pub trait RebalanceStrategy: Send + Sync {
    fn plan(&self, nodes: &[Node]) -> Vec<Migration>;
}

/// A strategy that never proposes a migration; the safe default so that
/// enabling auto-rebalance without a custom strategy is a no-op rather
/// than a panic.
pub struct NoopRebalanceStrategy;

impl RebalanceStrategy for NoopRebalanceStrategy {
    fn plan(&self, _nodes: &[Node]) -> Vec<Migration> {
        Vec::new()
    }
}

/// Rebalances by moving connection share away from the most-loaded node
/// toward the least-loaded, one migration per call. Useful as a concrete
/// example strategy and in tests.
pub struct LoadSkewRebalanceStrategy {
    pub skew_threshold_percent: f64,
}

impl RebalanceStrategy for LoadSkewRebalanceStrategy {
    fn plan(&self, nodes: &[Node]) -> Vec<Migration> {
        let available: Vec<&Node> = nodes.iter().filter(|n| n.is_available()).collect();
        if available.len() < 2 {
            return Vec::new();
        }
        let max_node = available
            .iter()
            .max_by(|a, b| a.load_percent().partial_cmp(&b.load_percent()).unwrap())
            .unwrap();
        let min_node = available
            .iter()
            .min_by(|a, b| a.load_percent().partial_cmp(&b.load_percent()).unwrap())
            .unwrap();

        if max_node.id == min_node.id {
            return Vec::new();
        }
        if max_node.load_percent() - min_node.load_percent() < self.skew_threshold_percent {
            return Vec::new();
        }

        vec![Migration {
            from: max_node.id.clone(),
            to: min_node.id.clone(),
            resource_type: ResourceType::Connections,
            resource_ids: Vec::new(),
            priority: 5,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::node::NodeRole;

    fn node(id: &str, conns: u32, max: u32) -> Node {
        let mut n = Node::new(NodeId::new(id), id, "127.0.0.1", 8080).with_roles([NodeRole::Worker]);
        n.capacity.max_connections = max;
        n.load.current_connections = conns;
        n
    }

    #[test]
    fn noop_strategy_never_plans() {
        let nodes = vec![node("a", 90, 100), node("b", 10, 100)];
        assert!(NoopRebalanceStrategy.plan(&nodes).is_empty());
    }

    #[test]
    fn load_skew_strategy_moves_from_hottest_to_coolest() {
        let nodes = vec![node("a", 90, 100), node("b", 10, 100)];
        let strategy = LoadSkewRebalanceStrategy { skew_threshold_percent: 20.0 };
        let plan = strategy.plan(&nodes);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].from, NodeId::new("a"));
        assert_eq!(plan[0].to, NodeId::new("b"));
    }

    #[test]
    fn load_skew_strategy_below_threshold_plans_nothing() {
        let nodes = vec![node("a", 55, 100), node("b", 50, 100)];
        let strategy = LoadSkewRebalanceStrategy { skew_threshold_percent: 20.0 };
        assert!(strategy.plan(&nodes).is_empty());
    }
}
