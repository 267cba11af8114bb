//! Proxy lists and the provisioner that hands them out.

use crate::endpoint::{Endpoint, EndpointId};
use crate::provisioner::Provisioner;

use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use reqwest::Client;
use std::collections::{HashSet, VecDeque};

/// Fetch and parse a list of proxies from a URL or file path.
pub async fn fetch_proxies_from_source(
    source: &str,
    default_scheme: &str,
) -> anyhow::Result<Vec<String>> {
    let content = if source.starts_with("http") {
        let response = Client::new()
            .get(source)
            .send()
            .await?
            .error_for_status()?;
        response.text().await?
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("reading proxy list {}", source))?
    };
    Ok(parse_proxy_list(&content, default_scheme))
}

/// Parse one proxy per line.
///
/// Lines that already carry a scheme are kept as they are, bare `host:port`
/// lines get `default_scheme`. Blank lines and `#` comments are skipped.
pub fn parse_proxy_list(content: &str, default_scheme: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                None
            } else if line.contains("://") {
                Some(line.to_string())
            } else if line.contains(':') {
                Some(format!("{}://{}", default_scheme, line))
            } else {
                None
            }
        })
        .collect()
}

/// Provisioner over a fixed list of existing proxies.
///
/// Every address is handed out at most once; a deprovisioned address is
/// retired for good since it was most likely blocked.
pub struct ListProvisioner {
    available: Mutex<VecDeque<String>>,
    retired: Mutex<HashSet<EndpointId>>,
}

impl ListProvisioner {
    /// Use `addresses` in the given order, dropping duplicates.
    pub fn new(addresses: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let available = addresses
            .into_iter()
            .filter(|a| seen.insert(EndpointId::from_address(a)))
            .collect();

        Self {
            available: Mutex::new(available),
            retired: Mutex::new(HashSet::new()),
        }
    }

    /// Load every source, merge and shuffle the result.
    ///
    /// A source that cannot be read is logged and skipped.
    pub async fn from_sources(sources: &[impl AsRef<str>], default_scheme: &str) -> Self {
        info!("Loading proxy list from {} sources", sources.len());

        let mut all = Vec::new();
        for source in sources {
            let source = source.as_ref();
            match fetch_proxies_from_source(source, default_scheme).await {
                Ok(found) => {
                    info!("Fetched {} proxies from {}", found.len(), source);
                    all.extend(found);
                }
                Err(e) => {
                    warn!("Failed to fetch proxies from {}: {}", source, e);
                }
            }
        }

        all.shuffle(&mut rand::rng());
        let provisioner = Self::new(all);
        info!("Found {} unique proxies", provisioner.remaining());
        provisioner
    }

    /// Addresses not yet handed out.
    pub fn remaining(&self) -> usize {
        self.available.lock().len()
    }

    pub fn is_retired(&self, id: &EndpointId) -> bool {
        self.retired.lock().contains(id)
    }
}

#[async_trait]
impl Provisioner for ListProvisioner {
    async fn provision(&self) -> anyhow::Result<Endpoint> {
        let next = self.available.lock().pop_front();
        match next {
            Some(address) => Ok(Endpoint::new(address)),
            None => bail!("proxy list exhausted"),
        }
    }

    async fn deprovision(&self, id: &EndpointId) -> anyhow::Result<()> {
        self.retired.lock().insert(id.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "list"
    }
}
