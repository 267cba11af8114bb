//! # rotating-proxy-pool
//!
//! A rotating pool of outbound proxy endpoints.
//!
//! The pool keeps a target number of endpoints alive through a pluggable
//! [`Provisioner`], admits each one only after a [`HealthProbe`] confirms it
//! routes traffic, and hands endpoints out round-robin. Operations run
//! through a [`RetryExecutor`]: when one reports a [`ProxyError`] the
//! endpoint is blocked, deprovisioned and replaced, and the operation is
//! retried on the next endpoint up to a bounded number of attempts.
//!
//! ```no_run
//! use rotating_proxy_pool::{probe_fn, ListProvisioner, OperationError, ProxyPool, ProxyPoolConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provisioner = ListProvisioner::new(vec!["10.0.0.1:8888".into(), "10.0.0.2:8888".into()]);
//! let pool = ProxyPool::start(
//!     ProxyPoolConfig::builder().target_pool_size(2).build(),
//!     Arc::new(provisioner),
//!     Arc::new(probe_fn(|_| async { true })),
//! )
//! .await?;
//!
//! let body = pool
//!     .executor()
//!     .execute_bound(|bound| async move {
//!         let resp = bound
//!             .client
//!             .get("https://httpbin.org/ip")
//!             .send()
//!             .await
//!             .map_err(OperationError::Application)?;
//!         resp.text().await.map_err(OperationError::Application)
//!     })
//!     .await?;
//! println!("{}", body);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod health;
pub mod middleware;
pub mod pool;
pub mod provisioner;
pub mod retry;
pub mod rotation;
pub mod session;
pub mod sources;
pub mod tor;
pub mod waiter;

pub use client::{BoundClient, ClientFactory};
pub use config::{ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use endpoint::{Endpoint, EndpointEvent, EndpointId, EndpointState};
pub use error::{ExecuteError, OperationError, PoolError, ProxyError};
pub use executor::RetryExecutor;
pub use health::{probe_fn, HealthGate, HealthProbe, HttpProbe};
pub use middleware::ProxyPoolMiddleware;
pub use pool::{PoolStats, ProvisionBatch, ProxyPool};
pub use provisioner::Provisioner;
pub use retry::RetryPolicy;
pub use session::ProxySession;
pub use sources::ListProvisioner;
pub use tor::TorProvisioner;
pub use waiter::{AvailabilityWaiter, WaitOutcome};
