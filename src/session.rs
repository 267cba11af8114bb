//! A client that can swap its endpoint.

use crate::client::BoundClient;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::pool::ProxyPool;

use log::info;
use std::sync::Arc;

/// Holds one endpoint-bound client until told the endpoint is burnt.
pub struct ProxySession {
    pool: Arc<ProxyPool>,
    current: BoundClient,
}

impl ProxySession {
    /// Bind to the next endpoint in rotation.
    pub async fn new(pool: Arc<ProxyPool>) -> Result<Self> {
        let current = pool.client().await?;
        Ok(Self { pool, current })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.current.client
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.current.endpoint
    }

    /// Block the current endpoint and move to the next one.
    pub async fn replace(&mut self) -> Result<()> {
        let old = self.current.endpoint.id().clone();
        self.pool.block(old.as_str()).await?;
        self.current = self.pool.client().await?;
        info!("Session moved from {} to {}", old, self.current.endpoint.id());
        Ok(())
    }
}
