//! HTTP health probe: request a URL built from the node's address
//! parts, treat the configured status (and optionally body) as
//! healthy (spec section 6: "HTTP health check").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;

use super::{CheckResult, HealthChecker};

#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    pub scheme: String,
    pub address: String,
    pub port: u16,
    pub endpoint: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub expected_status: u16,
    pub expected_body: Option<String>,
    pub timeout: Duration,
    pub interval: Duration,
    pub skip_tls_verify: bool,
    client: reqwest::Client,
}

fn build_client(skip_tls_verify: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(skip_tls_verify)
        .build()
        .expect("reqwest client with static TLS config never fails to build")
}

impl HttpHealthCheck {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "http".to_string(),
            address: address.into(),
            port,
            endpoint: "/health".to_string(),
            method: Method::GET,
            headers: HashMap::new(),
            expected_status: 200,
            expected_body: None,
            timeout: Duration::from_secs(3),
            interval: Duration::from_secs(10),
            skip_tls_verify: false,
            client: build_client(false),
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    /// Body compared verbatim against the response when set (spec
    /// section 6: "body compared verbatim when ExpectedBody is non-empty").
    pub fn with_expected_body(mut self, body: impl Into<String>) -> Self {
        self.expected_body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_skip_tls_verify(mut self, skip: bool) -> Self {
        self.skip_tls_verify = skip;
        self.client = build_client(skip);
        self
    }

    fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.address, self.port, self.endpoint)
    }
}

#[async_trait]
impl HealthChecker for HttpHealthCheck {
    async fn check(&self) -> CheckResult {
        let start = Instant::now();
        let mut request = self.client.request(self.method.clone(), self.url()).timeout(self.timeout);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status != self.expected_status {
                    return CheckResult::fail(
                        format!("unexpected status {status}, wanted {}", self.expected_status),
                        start.elapsed(),
                    );
                }
                if let Some(expected) = &self.expected_body {
                    match response.text().await {
                        Ok(body) if &body == expected => CheckResult::pass(start.elapsed()),
                        Ok(body) => CheckResult::fail(
                            format!("body mismatch: expected {expected:?}, got {body:?}"),
                            start.elapsed(),
                        ),
                        Err(e) => CheckResult::fail(format!("failed reading response body: {e}"), start.elapsed()),
                    }
                } else {
                    CheckResult::pass(start.elapsed())
                }
            }
            Err(e) => CheckResult::fail(format!("http request failed: {e}"), start.elapsed()),
        }
    }

    fn check_type(&self) -> &'static str {
        "http"
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_spec() {
        let checker = HttpHealthCheck::new("localhost", 8080);
        assert_eq!(checker.expected_status, 200);
        assert_eq!(checker.endpoint, "/health");
        assert_eq!(checker.method, Method::GET);
        assert_eq!(checker.check_type(), "http");
        assert_eq!(checker.url(), "http://localhost:8080/health");
    }

    #[test]
    fn url_is_built_from_scheme_address_port_endpoint() {
        let checker = HttpHealthCheck::new("10.0.0.5", 9090).with_scheme("https").with_endpoint("/status");
        assert_eq!(checker.url(), "https://10.0.0.5:9090/status");
    }

    #[tokio::test]
    async fn unreachable_host_is_unhealthy() {
        let checker = HttpHealthCheck::new("127.0.0.1", 1).with_timeout(Duration::from_millis(200));
        let result = checker.check().await;
        assert!(!result.healthy);
    }
}
