//! Tor-backed provisioner.
//!
//! Every provision asks the local Tor daemon for a fresh circuit and hands
//! back its SOCKS port. Many sites block Tor exits outright, so this backend
//! suits targets that only rate-limit per address.

use crate::endpoint::{Endpoint, EndpointId};
use crate::provisioner::Provisioner;

use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;

/// Renews Tor circuits over the control port.
#[derive(Debug, Clone)]
pub struct TorProvisioner {
    control_addr: String,
    socks_addr: String,
    password: Option<String>,
    timeout: Duration,
}

impl TorProvisioner {
    pub fn new(control_addr: impl Into<String>, socks_addr: impl Into<String>) -> Self {
        Self {
            control_addr: control_addr.into(),
            socks_addr: socks_addr.into(),
            password: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Authenticate to the control port with `password`.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the daemon to switch to new circuits.
    pub async fn new_circuit(&self) -> anyhow::Result<()> {
        time::timeout(self.timeout, self.signal_newnym())
            .await
            .with_context(|| format!("tor control port {} timed out", self.control_addr))?
    }

    async fn signal_newnym(&self) -> anyhow::Result<()> {
        let stream = TcpStream::connect(&self.control_addr)
            .await
            .with_context(|| format!("connecting to tor control port {}", self.control_addr))?;
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let auth = match &self.password {
            Some(password) => format!(
                "AUTHENTICATE \"{}\"\r\n",
                password.replace('\\', "\\\\").replace('"', "\\\"")
            ),
            None => "AUTHENTICATE\r\n".to_string(),
        };
        command(&mut write, &mut lines, "AUTHENTICATE", &auth).await?;
        command(&mut write, &mut lines, "SIGNAL NEWNYM", "SIGNAL NEWNYM\r\n").await?;

        // The daemon answers QUIT and hangs up; nothing left to check.
        let _ = write.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

async fn command(
    write: &mut OwnedWriteHalf,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    name: &str,
    line: &str,
) -> anyhow::Result<()> {
    write.write_all(line.as_bytes()).await?;
    let reply = lines
        .next_line()
        .await?
        .with_context(|| format!("tor closed the control connection after {}", name))?;
    if !reply.starts_with("250") {
        bail!("tor rejected {}: {}", name, reply);
    }
    Ok(())
}

#[async_trait]
impl Provisioner for TorProvisioner {
    async fn provision(&self) -> anyhow::Result<Endpoint> {
        self.new_circuit().await?;
        info!("Requested new tor circuit via {}", self.control_addr);
        Ok(Endpoint::new(format!("socks5h://{}", self.socks_addr)))
    }

    async fn deprovision(&self, id: &EndpointId) -> anyhow::Result<()> {
        // The daemon outlives its circuits.
        debug!("Released tor endpoint {}", id);
        Ok(())
    }

    fn name(&self) -> &str {
        "tor"
    }
}
