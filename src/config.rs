//! Configuration for the proxy pool.

use crate::retry::RetryPolicy;

use reqwest::StatusCode;
use std::time::Duration;

/// User agent sent by clients built for pool endpoints.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36";

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Number of endpoints to keep ready or provisioning.
    pub target_pool_size: usize,
    /// Caller-facing retry policy used by the executor.
    pub retry: RetryPolicy,
    /// Probe budget for a freshly provisioned endpoint.
    pub health_gate: RetryPolicy,
    /// How often a waiter re-checks the ready count.
    pub wait_poll_interval: Duration,
    /// How long `next()` waits for an endpoint before giving up.
    pub wait_timeout: Duration,
    /// URL fetched through an endpoint by the HTTP probe.
    pub health_check_url: String,
    /// User agent for endpoint-bound clients.
    pub user_agent: String,
    /// Connect timeout for endpoint-bound clients.
    pub connect_timeout: Duration,
    /// Whole-request timeout for endpoint-bound clients.
    pub request_timeout: Duration,
    /// Maximum requests per second per endpoint, if limited.
    pub max_requests_per_second: Option<f64>,
    /// Response statuses the middleware treats as "endpoint blocked".
    pub blocked_statuses: Vec<StatusCode>,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    target_pool_size: Option<usize>,
    retry: Option<RetryPolicy>,
    health_gate: Option<RetryPolicy>,
    wait_poll_interval: Option<Duration>,
    wait_timeout: Option<Duration>,
    health_check_url: Option<String>,
    user_agent: Option<String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    max_requests_per_second: Option<f64>,
    blocked_statuses: Option<Vec<StatusCode>>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            target_pool_size: None,
            retry: None,
            health_gate: None,
            wait_poll_interval: None,
            wait_timeout: None,
            health_check_url: None,
            user_agent: None,
            connect_timeout: None,
            request_timeout: None,
            max_requests_per_second: None,
            blocked_statuses: None,
        }
    }

    /// Set the number of endpoints the pool keeps alive.
    pub fn target_pool_size(mut self, size: usize) -> Self {
        self.target_pool_size = Some(size);
        self
    }

    /// Set the retry policy used when executing operations.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Set the probe policy for newly provisioned endpoints.
    pub fn health_gate(mut self, policy: RetryPolicy) -> Self {
        self.health_gate = Some(policy);
        self
    }

    /// Set how often waiters poll the ready count.
    pub fn wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = Some(interval);
        self
    }

    /// Set how long `next()` waits for a ready endpoint.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Set the URL used for health checks.
    pub fn health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Set the user agent of endpoint-bound clients.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the connect timeout of endpoint-bound clients.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the request timeout of endpoint-bound clients.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the maximum requests per second per endpoint.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Set the statuses treated as a blocked endpoint.
    pub fn blocked_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.blocked_statuses = Some(statuses);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            target_pool_size: self.target_pool_size.unwrap_or(1),
            retry: self.retry.unwrap_or_default(),
            health_gate: self
                .health_gate
                .unwrap_or_else(|| RetryPolicy::new(5, Duration::from_secs(1))),
            wait_poll_interval: self.wait_poll_interval.unwrap_or(Duration::from_secs(1)),
            wait_timeout: self.wait_timeout.unwrap_or(Duration::from_secs(300)),
            health_check_url: self
                .health_check_url
                .unwrap_or_else(|| "http://api.ipify.org".to_string()),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(10)),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
            max_requests_per_second: self.max_requests_per_second,
            blocked_statuses: self
                .blocked_statuses
                .unwrap_or_else(|| vec![StatusCode::FORBIDDEN, StatusCode::TOO_MANY_REQUESTS]),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyPoolConfig::default();
        assert_eq!(config.target_pool_size, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.backoff_multiplier, 1.0);
        assert_eq!(config.health_gate.max_attempts, 5);
        assert_eq!(config.wait_poll_interval, Duration::from_secs(1));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.max_requests_per_second.is_none());
        assert!(config.blocked_statuses.contains(&StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn test_builder_overrides() {
        let config = ProxyPoolConfig::builder()
            .target_pool_size(4)
            .retry(RetryPolicy::new(7, Duration::from_millis(5)).with_backoff_multiplier(2.0))
            .wait_timeout(Duration::from_secs(2))
            .max_requests_per_second(3.0)
            .blocked_statuses(vec![StatusCode::SERVICE_UNAVAILABLE])
            .build();

        assert_eq!(config.target_pool_size, 4);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.wait_timeout, Duration::from_secs(2));
        assert_eq!(config.max_requests_per_second, Some(3.0));
        assert_eq!(config.blocked_statuses, vec![StatusCode::SERVICE_UNAVAILABLE]);
    }
}
