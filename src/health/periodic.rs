//! Wraps any [`HealthChecker`], runs it on its own interval, and serves
//! the last result to callers synchronously (spec section 4.C: "Periodic
//! wraps any checker, runs it on an interval, and serves the last result
//! to callers (unknown until first result)").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CheckResult, HealthChecker};

/// Runs `inner` on `inner.interval()` in a detached task and caches the
/// last result so [`HealthChecker::check`] on this wrapper is a cheap,
/// non-blocking read instead of re-probing. Before the first background
/// tick completes, `check()` returns [`CheckResult::unknown`].
pub struct PeriodicChecker {
    inner: Arc<dyn HealthChecker>,
    last: Arc<RwLock<Option<CheckResult>>>,
    running: Arc<AtomicBool>,
}

impl PeriodicChecker {
    /// Spawns the background loop immediately.
    pub fn start(inner: Arc<dyn HealthChecker>) -> Self {
        let last = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let inner_task = Arc::clone(&inner);
        let last_task = Arc::clone(&last);
        let running_task = Arc::clone(&running);

        tokio::spawn(async move {
            let interval = inner_task.interval();
            while running_task.load(Ordering::Acquire) {
                let result = inner_task.check().await;
                *last_task.write() = Some(result);
                tokio::time::sleep(interval).await;
            }
        });

        Self { inner, last, running }
    }

    /// Same as [`Self::start`] but additionally invokes `on_result` with
    /// each new result, inline on the loop's task.
    pub fn start_with_callback<F>(inner: Arc<dyn HealthChecker>, mut on_result: F) -> Self
    where
        F: FnMut(CheckResult) + Send + 'static,
    {
        let last = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let inner_task = Arc::clone(&inner);
        let last_task = Arc::clone(&last);
        let running_task = Arc::clone(&running);

        tokio::spawn(async move {
            let interval = inner_task.interval();
            while running_task.load(Ordering::Acquire) {
                let result = inner_task.check().await;
                *last_task.write() = Some(result.clone());
                on_result(result);
                tokio::time::sleep(interval).await;
            }
        });

        Self { inner, last, running }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[async_trait]
impl HealthChecker for PeriodicChecker {
    /// Returns the last result the background loop produced, or
    /// [`CheckResult::unknown`] if it hasn't run yet. Never re-probes —
    /// that only happens on the loop's own schedule.
    async fn check(&self) -> CheckResult {
        self.last.read().clone().unwrap_or_else(CheckResult::unknown)
    }

    fn check_type(&self) -> &'static str {
        self.inner.check_type()
    }

    fn interval(&self) -> Duration {
        self.inner.interval()
    }
}

impl Drop for PeriodicChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CheckStatus;
    use std::sync::Mutex;

    struct FastChecker;

    #[async_trait]
    impl HealthChecker for FastChecker {
        async fn check(&self) -> CheckResult {
            CheckResult::pass(Duration::from_millis(1))
        }

        fn check_type(&self) -> &'static str {
            "fast"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }
    }

    #[tokio::test]
    async fn unknown_until_first_result() {
        let periodic = PeriodicChecker::start(Arc::new(FastChecker));
        // Read immediately, before the background loop has had a chance
        // to run; cannot guarantee zero scheduling, so only assert the
        // possible states are Unknown or Pass.
        let status = periodic.check().await.status;
        assert!(matches!(status, CheckStatus::Unknown | CheckStatus::Pass));
    }

    #[tokio::test]
    async fn serves_cached_result_after_first_tick() {
        let periodic = PeriodicChecker::start(Arc::new(FastChecker));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = periodic.check().await;
        assert!(result.healthy);
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn stop_halts_background_refresh() {
        let periodic = PeriodicChecker::start(Arc::new(FastChecker));
        tokio::time::sleep(Duration::from_millis(20)).await;
        periodic.stop();
        assert!(!periodic.is_running());
    }

    #[tokio::test]
    async fn callback_variant_runs_checker_repeatedly_until_stopped() {
        let count = Arc::new(Mutex::new(0usize));
        let count_cb = Arc::clone(&count);

        let periodic = PeriodicChecker::start_with_callback(Arc::new(FastChecker), move |_result| {
            *count_cb.lock().unwrap() += 1;
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        periodic.stop();
        let seen_before_stop = *count.lock().unwrap();
        assert!(seen_before_stop >= 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen_after_stop = *count.lock().unwrap();
        assert!(seen_after_stop <= seen_before_stop + 1);
    }
}
