//! Shared helpers for integration tests.
#![allow(dead_code)]

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use rotating_proxy_pool::{
    probe_fn, Endpoint, EndpointId, HealthProbe, Provisioner, ProxyPoolConfig, RetryPolicy,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Provisioner that makes up `http://10.0.0.N:8888` endpoints and counts calls.
pub struct MockProvisioner {
    provisions: AtomicUsize,
    deprovisions: AtomicUsize,
    failing: AtomicBool,
    failing_deprovision: AtomicBool,
    panicking: AtomicBool,
    delay: Duration,
    fixed_address: Option<String>,
    discovered: Vec<String>,
    deprovisioned: Mutex<Vec<EndpointId>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self {
            provisions: AtomicUsize::new(0),
            deprovisions: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            failing_deprovision: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            delay: Duration::from_millis(5),
            fixed_address: None,
            discovered: Vec::new(),
            deprovisioned: Mutex::new(Vec::new()),
        }
    }

    /// Every provision and deprovision takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every provision returns the same address.
    pub fn with_fixed_address(mut self, address: &str) -> Self {
        self.fixed_address = Some(address.to_string());
        self
    }

    /// Addresses reported by `discover`.
    pub fn with_discovered(mut self, addresses: &[&str]) -> Self {
        self.discovered = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_deprovision(&self, failing: bool) {
        self.failing_deprovision.store(failing, Ordering::SeqCst);
    }

    /// Make `provision` panic instead of returning.
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn deprovisions(&self) -> usize {
        self.deprovisions.load(Ordering::SeqCst)
    }

    pub fn deprovisioned(&self) -> Vec<EndpointId> {
        self.deprovisioned.lock().clone()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn provision(&self) -> anyhow::Result<Endpoint> {
        let n = self.provisions.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        if self.panicking.load(Ordering::SeqCst) {
            panic!("provisioner backend crashed");
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("spot capacity unavailable");
        }
        match &self.fixed_address {
            Some(address) => Ok(Endpoint::new(address.clone())),
            None => Ok(Endpoint::new(format!("http://10.0.0.{}:8888", n))),
        }
    }

    async fn deprovision(&self, id: &EndpointId) -> anyhow::Result<()> {
        self.deprovisions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.deprovisioned.lock().push(id.clone());

        if self.failing_deprovision.load(Ordering::SeqCst) {
            bail!("instance {} refused to terminate", id);
        }
        Ok(())
    }

    async fn discover(&self) -> anyhow::Result<Vec<Endpoint>> {
        Ok(self.discovered.iter().map(|a| Endpoint::new(a.as_str())).collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn healthy() -> Arc<dyn HealthProbe> {
    Arc::new(probe_fn(|_| async { true }))
}

pub fn unhealthy() -> Arc<dyn HealthProbe> {
    Arc::new(probe_fn(|_| async { false }))
}

/// Config with millisecond timings so tests stay quick.
pub fn fast_config(target: usize) -> ProxyPoolConfig {
    ProxyPoolConfig::builder()
        .target_pool_size(target)
        .retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .health_gate(RetryPolicy::new(2, Duration::from_millis(1)))
        .wait_poll_interval(Duration::from_millis(5))
        .wait_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_millis(500))
        .request_timeout(Duration::from_secs(2))
        .build()
}

/// A stand-in HTTP proxy that answers every request itself with `status`
/// and `body`. Returns its address.
pub async fn fake_proxy(status: u16, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {} Fake\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}
