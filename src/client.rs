//! Clients routed through a pool endpoint.

use crate::config::ProxyPoolConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;

use std::time::Duration;

/// Builds `reqwest::Client`s that send everything through one endpoint.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    user_agent: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ClientFactory {
    pub fn new(
        user_agent: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_config(config: &ProxyPoolConfig) -> Self {
        Self::new(
            config.user_agent.clone(),
            config.connect_timeout,
            config.request_timeout,
        )
    }

    /// Override the whole-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build a client whose traffic goes through `endpoint`.
    ///
    /// An explicit proxy also switches off proxies picked up from the
    /// environment.
    pub fn build(&self, endpoint: &Endpoint) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .proxy(endpoint.to_reqwest_proxy()?)
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
    }

    /// Pair `endpoint` with a client routed through it.
    pub fn bind(&self, endpoint: Endpoint) -> Result<BoundClient> {
        let client = self.build(&endpoint)?;
        Ok(BoundClient { endpoint, client })
    }
}

/// A client together with the endpoint it is routed through.
#[derive(Debug, Clone)]
pub struct BoundClient {
    pub endpoint: Endpoint,
    pub client: reqwest::Client,
}
