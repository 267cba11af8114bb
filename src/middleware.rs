//! Middleware implementation for reqwest.

use crate::config::ProxyPoolConfig;
use crate::error::{ExecuteError, OperationError, ProxyError};
use crate::executor::RetryExecutor;
use crate::health::HealthProbe;
use crate::pool::ProxyPool;
use crate::provisioner::Provisioner;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Middleware that sends every request through a rotating proxy.
///
/// Blocked statuses and connect/timeout failures replace the endpoint and
/// retry; other errors are returned as they are.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    executor: RetryExecutor,
    blocked_statuses: Arc<Vec<StatusCode>>,
}

impl ProxyPoolMiddleware {
    /// Wrap an existing pool.
    pub fn from_pool(pool: Arc<ProxyPool>) -> Self {
        let blocked_statuses = Arc::new(pool.config.blocked_statuses.clone());
        Self {
            executor: pool.executor(),
            pool,
            blocked_statuses,
        }
    }

    /// Start a pool and wait for its first endpoint.
    pub async fn start(
        config: ProxyPoolConfig,
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn HealthProbe>,
    ) -> crate::error::Result<Self> {
        let wait_timeout = config.wait_timeout;
        let pool = ProxyPool::start(config, provisioner, probe).await?;

        if !pool.wait_ready(1, wait_timeout).await {
            warn!("No ready proxies available in pool");
        }
        let stats = pool.stats();
        info!(
            "Proxy pool initialized with {}/{} ready proxies",
            stats.ready, stats.target
        );

        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        if req.try_clone().is_none() {
            return Err(Error::Middleware(anyhow!(
                "Request object is not cloneable. Are you passing a streaming body?"
            )));
        }

        let blocked = Arc::clone(&self.blocked_statuses);
        let outcome = self
            .executor
            .execute_bound(move |bound| {
                let attempt = req.try_clone();
                let blocked = Arc::clone(&blocked);
                async move {
                    let request = match attempt {
                        Some(request) => request,
                        None => {
                            return Err(OperationError::Application(Error::Middleware(anyhow!(
                                "Request object is not cloneable"
                            ))))
                        }
                    };

                    debug!("Using proxy: {}", bound.endpoint.id());
                    match bound.client.execute(request).await {
                        Ok(response) if blocked.contains(&response.status()) => {
                            Err(OperationError::Proxy(ProxyError::new(format!(
                                "status {}",
                                response.status()
                            ))))
                        }
                        Ok(response) => Ok(response),
                        Err(e) if e.is_connect() || e.is_timeout() => {
                            Err(OperationError::Proxy(ProxyError::new(e.to_string())))
                        }
                        Err(e) => Err(OperationError::Application(Error::Reqwest(e))),
                    }
                }
            })
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(ExecuteError::Application(e)) => Err(e),
            Err(other) => {
                let stats = self.pool.stats();
                warn!(
                    "Request failed through proxy pool ({} ready of {}): {}",
                    stats.ready, stats.target, other
                );
                Err(Error::Middleware(anyhow::Error::new(other)))
            }
        }
    }
}
