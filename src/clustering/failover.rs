//! Failover manager — failure/recovery counting, state transitions, and
//! listener fan-out (spec section 4.F).
//!
//! `HandleFailure`/`RecoverNode` run in detached tasks so the health-probe
//! loop that drives `check_node_health` is never blocked by a slow
//! listener or alert callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clustering::migration::{Migration, NoopRebalanceStrategy, RebalanceStrategy};
use crate::clustering::node::{Node, NodeId};
use crate::health::HealthChecker;

/// Derived per-node failover state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeFailoverState {
    Healthy,
    Degraded,
    Failed,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub node_id: Option<NodeId>,
    pub message: String,
    pub timestamp: u64,
}

/// A failover lifecycle event, in the order the spec requires it emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FailoverEvent {
    NodeMarkedFailed { node_id: NodeId, timestamp: u64 },
    FailoverStarted { node_id: NodeId, timestamp: u64 },
    FailoverCompleted { node_id: NodeId, timestamp: u64 },
    RecoveryStarted { node_id: NodeId, timestamp: u64 },
    RecoveryCompleted { node_id: NodeId, timestamp: u64 },
    Rebalance { migrations: Vec<Migration>, timestamp: u64 },
}

/// Receives failover lifecycle events. Must not hold a strong reference
/// back to the manager that invokes it (emit-then-return contract).
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &FailoverEvent);
}

#[derive(Debug, Clone, Copy)]
pub struct FailoverConfig {
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub auto_rebalance_enabled: bool,
    pub rebalance_interval: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 2,
            auto_rebalance_enabled: false,
            rebalance_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeCounters {
    consecutive_failures: u32,
    consecutive_successes: u32,
    state: Option<NodeFailoverState>,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

struct Inner {
    counters: HashMap<NodeId, NodeCounters>,
    listeners: Vec<Arc<dyn EventListener>>,
}

/// Tracks per-node failure/recovery counters and drives the Failed /
/// Healthy transitions described in spec section 4.F.
pub struct FailoverManager {
    config: FailoverConfig,
    inner: Arc<Mutex<Inner>>,
    alert_callback: Option<Arc<dyn Fn(Alert) + Send + Sync>>,
    rebalance_strategy: Arc<dyn RebalanceStrategy>,
    rebalance_task: Mutex<Option<JoinHandle<()>>>,
    rebalance_count: Arc<Mutex<u64>>,
}

impl FailoverManager {
    pub fn new(config: FailoverConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                counters: HashMap::new(),
                listeners: Vec::new(),
            })),
            alert_callback: None,
            rebalance_strategy: Arc::new(NoopRebalanceStrategy),
            rebalance_task: Mutex::new(None),
            rebalance_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_alert_callback(mut self, cb: impl Fn(Alert) + Send + Sync + 'static) -> Self {
        self.alert_callback = Some(Arc::new(cb));
        self
    }

    pub fn with_rebalance_strategy(mut self, strategy: Arc<dyn RebalanceStrategy>) -> Self {
        self.rebalance_strategy = strategy;
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.lock().listeners.push(listener);
    }

    pub fn state_of(&self, node_id: &NodeId) -> NodeFailoverState {
        self.inner
            .lock()
            .counters
            .get(node_id)
            .and_then(|c| c.state)
            .unwrap_or(NodeFailoverState::Healthy)
    }

    fn emit(&self, event: FailoverEvent) {
        let listeners = self.inner.lock().listeners.clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn alert(&self, severity: AlertSeverity, node_id: Option<NodeId>, message: impl Into<String>) {
        if let Some(cb) = &self.alert_callback {
            cb(Alert {
                severity,
                node_id,
                message: message.into(),
                timestamp: now_secs(),
            });
        }
    }

    /// Runs `checker` against `node_id` and updates counters, asynchronously
    /// invoking `handle_failure`/`recover_node` when a threshold is crossed.
    pub async fn check_node_health(self: &Arc<Self>, node_id: NodeId, checker: Arc<dyn HealthChecker>) {
        let result = checker.check().await;

        let crossed_failure;
        let crossed_recovery;
        {
            let mut inner = self.inner.lock();
            let counters = inner.counters.entry(node_id.clone()).or_default();
            if result.healthy {
                counters.consecutive_failures = 0;
                counters.consecutive_successes += 1;
                crossed_recovery = counters.consecutive_successes >= self.config.recovery_threshold
                    && counters.state == Some(NodeFailoverState::Failed);
                crossed_failure = false;
            } else {
                counters.consecutive_successes = 0;
                counters.consecutive_failures += 1;
                crossed_failure = counters.consecutive_failures >= self.config.failure_threshold
                    && counters.state != Some(NodeFailoverState::Failed);
                crossed_recovery = false;
            }
        }

        if crossed_failure {
            let this = Arc::clone(self);
            let id = node_id.clone();
            tokio::spawn(async move { this.handle_failure(id).await });
        }
        if crossed_recovery {
            let this = Arc::clone(self);
            let id = node_id.clone();
            tokio::spawn(async move { this.recover_node(id).await });
        }
    }

    pub async fn handle_failure(&self, node_id: NodeId) {
        {
            let mut inner = self.inner.lock();
            inner.counters.entry(node_id.clone()).or_default().state = Some(NodeFailoverState::Failed);
        }
        let ts = now_secs();
        self.emit(FailoverEvent::NodeMarkedFailed { node_id: node_id.clone(), timestamp: ts });
        self.emit(FailoverEvent::FailoverStarted { node_id: node_id.clone(), timestamp: ts });
        self.emit(FailoverEvent::FailoverCompleted { node_id: node_id.clone(), timestamp: ts });
        self.alert(AlertSeverity::Critical, Some(node_id.clone()), format!("node {node_id} marked failed"));
    }

    pub async fn recover_node(&self, node_id: NodeId) {
        {
            let mut inner = self.inner.lock();
            let counters = inner.counters.entry(node_id.clone()).or_default();
            counters.state = Some(NodeFailoverState::Healthy);
            counters.consecutive_failures = 0;
            counters.consecutive_successes = 0;
        }
        let ts = now_secs();
        self.emit(FailoverEvent::RecoveryStarted { node_id: node_id.clone(), timestamp: ts });
        self.emit(FailoverEvent::RecoveryCompleted { node_id: node_id.clone(), timestamp: ts });
        self.alert(AlertSeverity::Info, Some(node_id.clone()), format!("node {node_id} recovered"));
    }

    /// Starts the background auto-rebalance loop, if enabled. A no-op if
    /// already started or disabled in config.
    pub fn start_auto_rebalance(self: &Arc<Self>, nodes_provider: Arc<dyn Fn() -> Vec<Node> + Send + Sync>) {
        if !self.config.auto_rebalance_enabled {
            return;
        }
        let mut guard = self.rebalance_task.lock();
        if guard.is_some() {
            return;
        }
        let this = Arc::clone(self);
        let interval = self.config.rebalance_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let nodes = nodes_provider();
                let plan = this.rebalance_strategy.plan(&nodes);
                *this.rebalance_count.lock() += 1;
                this.alert(
                    AlertSeverity::Info,
                    None,
                    format!("rebalance tick produced {} migrations", plan.len()),
                );
                this.emit(FailoverEvent::Rebalance { migrations: plan, timestamp: now_secs() });
            }
        });
        *guard = Some(handle);
    }

    pub fn rebalance_count(&self) -> u64 {
        *self.rebalance_count.lock()
    }

    /// Terminates the background rebalance task cleanly. Idempotent.
    pub fn close(&self) {
        if let Some(handle) = self.rebalance_task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for FailoverManager {
    fn drop(&mut self) {
        self.close();
    }
}
