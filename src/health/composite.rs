//! Folds several health probes into a single verdict.

use std::time::Instant;

use async_trait::async_trait;

use super::{CheckResult, HealthChecker};

/// How a [`CompositeHealthCheck`] combines its children's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// Healthy only if every child passes.
    All,
    /// Healthy if any child passes.
    Any,
    /// Healthy if more than half of the children pass.
    Majority,
}

pub struct CompositeHealthCheck {
    pub checks: Vec<Box<dyn HealthChecker>>,
    pub policy: AggregationPolicy,
}

impl CompositeHealthCheck {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { checks: Vec::new(), policy }
    }

    pub fn add(mut self, checker: Box<dyn HealthChecker>) -> Self {
        self.checks.push(checker);
        self
    }
}

#[async_trait]
impl HealthChecker for CompositeHealthCheck {
    async fn check(&self) -> CheckResult {
        let start = Instant::now();
        if self.checks.is_empty() {
            return CheckResult::fail("no child checks configured", start.elapsed());
        }

        let mut results = Vec::with_capacity(self.checks.len());
        for checker in &self.checks {
            results.push(checker.check().await);
        }

        let passed = results.iter().filter(|r| r.healthy).count();
        let total = results.len();

        let healthy = match self.policy {
            AggregationPolicy::All => passed == total,
            AggregationPolicy::Any => passed > 0,
            AggregationPolicy::Majority => passed * 2 > total,
        };

        if healthy && passed < total {
            CheckResult::degraded(format!("{passed}/{total} passed ({} policy)", policy_name(self.policy)), start.elapsed())
        } else if healthy {
            CheckResult::pass(start.elapsed())
        } else {
            let failures: Vec<String> = results
                .iter()
                .filter(|r| !r.healthy)
                .map(|r| r.message.clone())
                .collect();
            CheckResult::fail(
                format!("{passed}/{total} passed ({} policy); failures: {}", policy_name(self.policy), failures.join("; ")),
                start.elapsed(),
            )
        }
    }

    fn check_type(&self) -> &'static str {
        "composite"
    }
}

fn policy_name(policy: AggregationPolicy) -> &'static str {
    match policy {
        AggregationPolicy::All => "all",
        AggregationPolicy::Any => "any",
        AggregationPolicy::Majority => "majority",
    }
}
