//! TCP connect-and-close health probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{CheckResult, HealthChecker};

/// Dials `host:port`, treats a successful connect as healthy, and drops
/// the socket immediately. No application-level traffic is exchanged.
/// Failed attempts are retried up to `retry_count` additional times,
/// separated by `retry_delay` (spec section 4.C).
#[derive(Debug, Clone)]
pub struct TcpHealthCheck {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub interval: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl TcpHealthCheck {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(3),
            interval: Duration::from_secs(10),
            retry_count: 0,
            retry_delay: Duration::from_millis(200),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Retries a failed connect attempt this many additional times,
    /// waiting `retry_delay` between attempts.
    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    async fn try_connect(&self) -> std::result::Result<(), String> {
        let addr = format!("{}:{}", self.host, self.port);
        match timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("tcp connect failed: {e}")),
            Err(_) => Err("tcp connect timed out".to_string()),
        }
    }
}

#[async_trait]
impl HealthChecker for TcpHealthCheck {
    async fn check(&self) -> CheckResult {
        let start = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..=self.retry_count {
            match self.try_connect().await {
                Ok(()) => return CheckResult::pass(start.elapsed()),
                Err(e) => last_error = e,
            }
            if attempt < self.retry_count {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        CheckResult::fail(last_error, start.elapsed())
    }

    fn check_type(&self) -> &'static str {
        "tcp"
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_refused_is_unhealthy() {
        // Port 1 is reserved/unlikely to be listening in test sandboxes.
        let checker = TcpHealthCheck::new("127.0.0.1", 1).with_timeout(Duration::from_millis(200));
        let result = checker.check().await;
        assert!(!result.healthy);
    }

    #[tokio::test]
    async fn retries_before_reporting_unhealthy() {
        let checker = TcpHealthCheck::new("127.0.0.1", 1)
            .with_timeout(Duration::from_millis(100))
            .with_retry(2, Duration::from_millis(10));
        let start = Instant::now();
        let result = checker.check().await;
        assert!(!result.healthy);
        // Three attempts total (initial + 2 retries), each failing fast
        // on connection-refused, plus two retry delays.
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn check_type_is_tcp() {
        let checker = TcpHealthCheck::new("127.0.0.1", 80);
        assert_eq!(checker.check_type(), "tcp");
    }
}
