//! The seam between the pool and whatever creates proxies.

use crate::endpoint::{Endpoint, EndpointId};

use async_trait::async_trait;

/// Creates and destroys the network resource behind an endpoint.
///
/// One implementation per backend; the pool only sees this trait.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Bring up a new proxy and return it as a `Provisioning` endpoint.
    async fn provision(&self) -> anyhow::Result<Endpoint>;

    /// Tear down the proxy behind `id`.
    async fn deprovision(&self, id: &EndpointId) -> anyhow::Result<()>;

    /// Proxies that already exist when the pool starts.
    ///
    /// They still go through the health gate before joining rotation.
    async fn discover(&self) -> anyhow::Result<Vec<Endpoint>> {
        Ok(Vec::new())
    }

    /// Backend name for log lines.
    fn name(&self) -> &str;
}
