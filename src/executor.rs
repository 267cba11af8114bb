//! Running operations through the pool with block-and-retry.

use crate::client::BoundClient;
use crate::endpoint::Endpoint;
use crate::error::{ExecuteError, OperationError, PoolError};
use crate::pool::ProxyPool;
use crate::retry::RetryPolicy;

use log::{debug, error, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::time;

/// Runs caller operations against pool endpoints.
///
/// An `OperationError::Proxy` blocks the endpoint and retries on the next
/// one; anything else goes back to the caller on first occurrence.
#[derive(Clone)]
pub struct RetryExecutor {
    pool: Arc<ProxyPool>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(pool: Arc<ProxyPool>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` with an endpoint, replacing it on `ProxyError`.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: Future<Output = Result<T, OperationError<E>>>,
    {
        self.run(|endpoint| Ok(operation(endpoint))).await
    }

    /// Like `execute`, but hands the operation a client routed through the
    /// endpoint.
    pub async fn execute_bound<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(BoundClient) -> Fut,
        Fut: Future<Output = Result<T, OperationError<E>>>,
    {
        let clients = self.pool.clients().clone();
        self.run(|endpoint| Ok(operation(clients.bind(endpoint)?)))
            .await
    }

    async fn run<T, E, F, Fut>(&self, mut start: F) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(Endpoint) -> Result<Fut, PoolError>,
        Fut: Future<Output = Result<T, OperationError<E>>>,
    {
        let attempts = self.policy.attempts();
        let mut endpoint = self.pool.next().await?;
        let mut attempt = 1;

        loop {
            endpoint.throttle().await;
            let id = endpoint.id().clone();

            match start(endpoint)?.await {
                Ok(value) => {
                    self.pool.record_request(&id);
                    return Ok(value);
                }
                Err(OperationError::Application(e)) => return Err(ExecuteError::Application(e)),
                Err(OperationError::Proxy(err)) => {
                    if self.policy.should_warn(attempt) {
                        warn!(
                            "{} rejected on attempt {}/{}: {}",
                            id,
                            attempt,
                            attempts,
                            err.reason()
                        );
                    } else {
                        debug!(
                            "{} rejected on attempt {}/{}: {}",
                            id,
                            attempt,
                            attempts,
                            err.reason()
                        );
                    }

                    self.pool.block(id.as_str()).await?;

                    if attempt >= attempts {
                        error!("Giving up after {} attempts: {}", attempt, err.reason());
                        return Err(ExecuteError::ExhaustedRetries {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    time::sleep(self.policy.delay_after(attempt)).await;
                    endpoint = self.pool.next().await?;
                    attempt += 1;
                }
            }
        }
    }
}

impl ProxyPool {
    /// Executor using the pool's configured retry policy.
    pub fn executor(self: &Arc<Self>) -> RetryExecutor {
        RetryExecutor::new(Arc::clone(self), self.config.retry.clone())
    }
}
