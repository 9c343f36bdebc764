//! Circuit breaker: a per-call-site state machine (spec section 4.E).
//!
//! One mutex covers state plus all counters; `before_call`/`after_call`
//! take and release it but the guarded call itself runs outside the
//! lock (spec section 5).

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{FabricError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            half_open_max_requests: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub last_transition: Option<u64>,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    half_open_requests: u32,
    stats: CircuitBreakerStats,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Guards one logical call site. Cheap to clone via `Arc`; not `Clone`
/// itself since the lock and callback should stay singly owned.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    on_state_change: Option<Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                half_open_requests: 0,
                stats: CircuitBreakerStats::default(),
            }),
            on_state_change: None,
        }
    }

    pub fn with_on_state_change(
        mut self,
        callback: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(callback));
        self
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.stats.last_transition = Some(now_secs());
        if let Some(cb) = &self.on_state_change {
            cb(from, to);
        }
    }

    /// Call before invoking the guarded operation. `Ok(())` admits the
    /// call; `Err` carries the rejection reason.
    pub fn before_call(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.stats.total += 1;

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.success_count = 0;
                    inner.half_open_requests = 1;
                    Ok(())
                } else {
                    inner.stats.rejected += 1;
                    Err(FabricError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_requests < self.config.half_open_max_requests {
                    inner.half_open_requests += 1;
                    Ok(())
                } else {
                    inner.stats.rejected += 1;
                    Err(FabricError::TooManyRequests)
                }
            }
        }
    }

    /// Call after the guarded operation completes, regardless of path.
    pub fn after_call(&self, success: bool) {
        let mut inner = self.inner.lock();
        if success {
            inner.stats.successes += 1;
        } else {
            inner.stats.failures += 1;
        }

        match inner.state {
            CircuitState::Closed => {
                if success {
                    inner.failure_count = 0;
                } else {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        self.transition(&mut inner, CircuitState::Open);
                        inner.opened_at = Some(Instant::now());
                    }
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    inner.success_count += 1;
                    if inner.half_open_requests > 0 {
                        inner.half_open_requests -= 1;
                    }
                    if inner.success_count >= self.config.success_threshold {
                        self.transition(&mut inner, CircuitState::Closed);
                        inner.failure_count = 0;
                        inner.success_count = 0;
                    }
                } else {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(Instant::now());
                    inner.success_count = 0;
                    inner.half_open_requests = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.inner.lock().stats.clone()
    }

    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open);
        inner.opened_at = Some(Instant::now());
    }

    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        inner.half_open_requests = 0;
        inner.stats = CircuitBreakerStats::default();
    }
}

/// Convenience wrapper around a shared breaker for call sites that want
/// `Arc<CircuitBreaker>` semantics without repeating the clone.
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig { failure_threshold, timeout, ..Default::default() })
    }

    #[test]
    fn closed_admits_and_resets_on_success() {
        let cb = breaker(3, Duration::from_secs(30));
        cb.before_call().unwrap();
        cb.after_call(false);
        cb.after_call(false);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.after_call(true);
        cb.before_call().unwrap();
        cb.after_call(false);
        cb.after_call(false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_failure_threshold() {
        let cb = breaker(2, Duration::from_secs(30));
        cb.before_call().unwrap();
        cb.after_call(false);
        cb.before_call().unwrap();
        cb.after_call(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.before_call(), Err(FabricError::CircuitOpen)));
    }

    #[test]
    fn half_open_after_timeout_closes_after_success_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            timeout: Duration::from_millis(10),
            half_open_max_requests: 5,
        });
        cb.before_call().unwrap();
        cb.after_call(false);
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        cb.before_call().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.after_call(true);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.after_call(true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(10),
            ..Default::default()
        });
        cb.before_call().unwrap();
        cb.after_call(false);
        std::thread::sleep(Duration::from_millis(20));
        cb.before_call().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.after_call(false);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_rejects_beyond_max_requests() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(10),
            half_open_max_requests: 1,
            ..Default::default()
        });
        cb.before_call().unwrap();
        cb.after_call(false);
        std::thread::sleep(Duration::from_millis(20));
        cb.before_call().unwrap(); // transitions to half-open, consumes the one slot
        assert!(matches!(cb.before_call(), Err(FabricError::TooManyRequests)));
    }

    #[test]
    fn force_open_and_reset() {
        let cb = breaker(10, Duration::from_secs(30));
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().total, 0);
    }

    #[test]
    fn on_state_change_fires_on_every_transition() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let transitions_cb = Arc::clone(&transitions);
        let cb = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, ..Default::default() })
            .with_on_state_change(move |from, to| transitions_cb.lock().push((from, to)));

        cb.before_call().unwrap();
        cb.after_call(false);

        let recorded = transitions.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (CircuitState::Closed, CircuitState::Open));
    }
}
