//! Health checking (spec section 4.C).
//!
//! A [`HealthChecker`] is a pluggable probe a caller attaches to a node.
//! [`CompositeHealthCheck`] folds several probes into one verdict under an
//! All/Any/Majority policy; [`PeriodicChecker`] wraps any checker with an
//! interval and feeds results to a callback, which is how the failover
//! manager (`crate::clustering::failover`) stays fed without polling.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod composite;
mod http;
mod periodic;
mod tcp;

pub use composite::{AggregationPolicy, CompositeHealthCheck};
pub use http::HttpHealthCheck;
pub use periodic::PeriodicChecker;
pub use tcp::TcpHealthCheck;

/// Pass/fail verdict, kept distinct from `bool` so a caller can match on
/// finer states without reinterpreting `healthy`. `Degraded` is healthy
/// overall but masks at least one failing child check (composite);
/// `Unknown` is the pre-first-result state a [`PeriodicChecker`] serves
/// before its wrapped checker has run at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Pass,
    Fail,
    Degraded,
    Unknown,
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub healthy: bool,
    pub status: CheckStatus,
    pub message: String,
    pub latency: Duration,
    pub timestamp: u64,
    pub metadata: HashMap<String, String>,
}

impl CheckResult {
    pub fn pass(latency: Duration) -> Self {
        Self {
            healthy: true,
            status: CheckStatus::Pass,
            message: String::new(),
            latency,
            timestamp: now_secs(),
            metadata: HashMap::new(),
        }
    }

    pub fn fail(message: impl Into<String>, latency: Duration) -> Self {
        Self {
            healthy: false,
            status: CheckStatus::Fail,
            message: message.into(),
            latency,
            timestamp: now_secs(),
            metadata: HashMap::new(),
        }
    }

    /// Healthy overall but at least one child check failed (composite
    /// policies only — spec 4.C: "degraded iff healthy but some failed").
    pub fn degraded(message: impl Into<String>, latency: Duration) -> Self {
        Self {
            healthy: true,
            status: CheckStatus::Degraded,
            message: message.into(),
            latency,
            timestamp: now_secs(),
            metadata: HashMap::new(),
        }
    }

    /// Sentinel served by [`PeriodicChecker`] before its wrapped checker
    /// has produced a first result.
    pub fn unknown() -> Self {
        Self {
            healthy: false,
            status: CheckStatus::Unknown,
            message: "no check has completed yet".to_string(),
            latency: Duration::ZERO,
            timestamp: now_secs(),
            metadata: HashMap::new(),
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A pluggable health probe. Implementors report their own timeout
/// behavior in `check()` rather than relying on a caller-imposed deadline.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self) -> CheckResult;

    /// Human-readable probe kind, surfaced in alerts and logs.
    fn check_type(&self) -> &'static str;

    /// How often this checker wants to be invoked; advisory for
    /// [`PeriodicChecker`], ignored by ad-hoc callers.
    fn interval(&self) -> Duration {
        Duration::from_secs(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_result_is_healthy() {
        let r = CheckResult::pass(Duration::from_millis(5));
        assert!(r.healthy);
        assert_eq!(r.status, CheckStatus::Pass);
    }

    #[test]
    fn fail_result_carries_message() {
        let r = CheckResult::fail("connection refused", Duration::from_millis(5));
        assert!(!r.healthy);
        assert_eq!(r.status, CheckStatus::Fail);
        assert_eq!(r.message, "connection refused");
    }
}
