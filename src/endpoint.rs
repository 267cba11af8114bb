//! Endpoint representation and lifecycle.

use crate::error::{PoolError, Result};

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Lifecycle state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Provisioned but not yet validated by the health gate.
    Provisioning,
    /// Validated and eligible for rotation.
    Ready,
    /// Reported as blocked by a caller; awaiting deprovision.
    Blocked,
    /// Explicitly removed; awaiting deprovision.
    Stopping,
    /// Gone.
    Stopped,
}

/// Something that happened to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    HealthPassed,
    /// Health gate failed, or the pool was stopped mid-provisioning.
    Aborted,
    FailureReported,
    StopRequested,
    Deprovisioned,
}

/// Apply `event` to `from`, rejecting anything outside the lifecycle.
pub fn transition(from: EndpointState, event: EndpointEvent) -> Result<EndpointState> {
    use EndpointEvent::*;
    use EndpointState::*;

    match (from, event) {
        (Provisioning, HealthPassed) => Ok(Ready),
        (Provisioning, Aborted) => Ok(Stopped),
        (Ready, FailureReported) => Ok(Blocked),
        (Ready, StopRequested) => Ok(Stopping),
        (Stopping, Deprovisioned) | (Blocked, Deprovisioned) => Ok(Stopped),
        _ => Err(PoolError::InvalidTransition { from, event }),
    }
}

/// Stable identifier of an endpoint, derived from its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    /// Derive the id from an address or an existing id.
    ///
    /// `http://user:pw@1.2.3.4:8888/` and `1.2.3.4:8888` both map to
    /// `1.2.3.4:8888`.
    pub fn from_address(address: &str) -> Self {
        let trimmed = address.trim();
        match parse_address(trimmed) {
            Some(url) => match (url.host_str(), url.port_or_known_default()) {
                (Some(host), Some(port)) => Self(format!("{}:{}", host, port)),
                (Some(host), None) => Self(host.to_string()),
                _ => Self(trimmed.to_string()),
            },
            None => Self(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_address(address: &str) -> Option<Url> {
    if address.contains("://") {
        Url::parse(address).ok()
    } else {
        Url::parse(&format!("http://{}", address)).ok()
    }
}

/// One outbound proxy and its lifecycle state.
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: EndpointId,
    address: String,
    state: EndpointState,
    request_count: u64,
    created_at: Instant,
    limiter: Option<Arc<Limiter>>,
}

impl Endpoint {
    /// Create an endpoint in `Provisioning` for the given proxy address.
    ///
    /// Addresses without a scheme are taken to be HTTP proxies.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into().trim().to_string();
        let address = if address.contains("://") {
            address
        } else {
            format!("http://{}", address)
        };

        Self {
            id: EndpointId::from_address(&address),
            address,
            state: EndpointState::Provisioning,
            request_count: 0,
            created_at: Instant::now(),
            limiter: None,
        }
    }

    /// Attach a per-endpoint rate limit of `max_rps` requests per second.
    pub fn with_rate_limit(mut self, max_rps: f64) -> Self {
        let rps = NonZeroU32::new(max_rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
        self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        self
    }

    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// The proxy URL, e.g. `http://1.2.3.4:8888`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == EndpointState::Ready
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Move to the next state, or fail without changing anything.
    pub(crate) fn apply(&mut self, event: EndpointEvent) -> Result<EndpointState> {
        self.state = transition(self.state, event)?;
        Ok(self.state)
    }

    pub(crate) fn record_request(&mut self) {
        self.request_count += 1;
    }

    /// Wait until the endpoint's rate limit allows another request.
    pub(crate) async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Convert the address to a `reqwest::Proxy` covering all schemes.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(&self.address)
    }
}
