//! Health gate for newly provisioned endpoints.

use crate::client::ClientFactory;
use crate::endpoint::Endpoint;
use crate::retry::RetryPolicy;

use async_trait::async_trait;
use log::{debug, warn};
use std::future::Future;
use tokio::time;

/// Checks that an endpoint actually forwards traffic.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> bool;
}

/// Probe backed by an async closure.
pub struct FnProbe<F> {
    f: F,
}

/// Wrap `f` as a [`HealthProbe`].
pub fn probe_fn<F, Fut>(f: F) -> FnProbe<F>
where
    F: Fn(Endpoint) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    FnProbe { f }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn(Endpoint) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        (self.f)(endpoint.clone()).await
    }
}

/// Fetches a known URL through the endpoint.
///
/// Healthy means a success status with a non-empty body.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    check_url: String,
    clients: ClientFactory,
}

impl HttpProbe {
    pub fn new(check_url: impl Into<String>, clients: ClientFactory) -> Self {
        Self {
            check_url: check_url.into(),
            clients,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        let client = match self.clients.build(endpoint) {
            Ok(client) => client,
            Err(e) => {
                debug!("Cannot build probe client for {}: {}", endpoint.id(), e);
                return false;
            }
        };

        match client.get(&self.check_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => !body.trim().is_empty(),
                Err(_) => false,
            },
            Ok(resp) => {
                debug!("Probe through {} returned {}", endpoint.id(), resp.status());
                false
            }
            Err(e) => {
                debug!("Probe through {} failed: {}", endpoint.id(), e);
                false
            }
        }
    }
}

/// Retries a probe until it passes or the policy runs out.
#[derive(Debug, Clone)]
pub struct HealthGate {
    policy: RetryPolicy,
}

impl HealthGate {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn attempts(&self) -> u32 {
        self.policy.attempts()
    }

    /// Return `true` once `probe` passes for `endpoint`.
    pub async fn validate(&self, endpoint: &Endpoint, probe: &dyn HealthProbe) -> bool {
        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            if probe.probe(endpoint).await {
                debug!("{} passed health check on attempt {}", endpoint.id(), attempt);
                return true;
            }

            if self.policy.should_warn(attempt) {
                warn!(
                    "Waiting for {} to route traffic (attempt {}/{})",
                    endpoint.id(),
                    attempt,
                    attempts
                );
            } else {
                debug!("{} still not routing (attempt {}/{})", endpoint.id(), attempt, attempts);
            }

            if attempt < attempts {
                time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        false
    }
}
