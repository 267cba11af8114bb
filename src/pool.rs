//! Core proxy pool implementation.

use crate::client::{BoundClient, ClientFactory};
use crate::config::ProxyPoolConfig;
use crate::endpoint::{Endpoint, EndpointEvent, EndpointId, EndpointState};
use crate::error::{PoolError, Result};
use crate::health::{HealthGate, HealthProbe};
use crate::provisioner::Provisioner;
use crate::rotation::RoundRobin;
use crate::waiter::{AvailabilityWaiter, WaitOutcome};

use anyhow::anyhow;
use futures::future;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Everything the registry lock protects.
#[derive(Debug, Default)]
struct Registry {
    /// Members in insertion order, which is also rotation order.
    members: Vec<Endpoint>,
    /// Provision calls that have not returned yet.
    pending: usize,
    /// Last target passed to `ensure`.
    target: usize,
    /// Bumped by `stop_all` so late provisioning results are discarded.
    epoch: u64,
}

impl Registry {
    fn position(&self, id: &EndpointId) -> Option<usize> {
        self.members.iter().position(|e| e.id() == id)
    }

    fn count(&self, state: EndpointState) -> usize {
        self.members.iter().filter(|e| e.state() == state).count()
    }

    /// Members that are ready or passing through the health gate.
    fn admitted(&self) -> usize {
        self.count(EndpointState::Ready) + self.count(EndpointState::Provisioning)
    }

    /// Endpoints that are or will soon be ready.
    fn live(&self) -> usize {
        self.pending + self.admitted()
    }
}

/// Holds one unit of `Registry::pending` for a provisioning task.
///
/// Released on drop unless handed over to `admit`, so a panicking
/// provisioner does not leak the slot.
struct PendingSlot<'a> {
    registry: &'a RwLock<Registry>,
    armed: bool,
}

impl<'a> PendingSlot<'a> {
    fn new(registry: &'a RwLock<Registry>) -> Self {
        Self {
            registry,
            armed: true,
        }
    }

    /// `admit` now owns the decrement.
    fn hand_over(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut reg = self.registry.write();
            reg.pending = reg.pending.saturating_sub(1);
        }
    }
}

/// Point-in-time counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub ready: usize,
    pub provisioning: usize,
    pub blocked: usize,
    pub stopping: usize,
    pub pending: usize,
    pub target: usize,
}

/// Provisioning tasks started by one `ensure` call.
///
/// Dropping the batch leaves the tasks running.
#[derive(Debug, Default)]
pub struct ProvisionBatch {
    handles: Vec<JoinHandle<Result<EndpointId>>>,
}

impl ProvisionBatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task and collect what each one produced.
    pub async fn wait(self) -> Vec<Result<EndpointId>> {
        future::join_all(self.handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => Err(PoolError::Provision(anyhow!("provisioning task failed: {}", e))),
            })
            .collect()
    }
}

/// A pool of proxy endpoints kept at a target size.
pub struct ProxyPool {
    registry: RwLock<Registry>,
    selector: RoundRobin,
    provisioner: Arc<dyn Provisioner>,
    probe: Arc<dyn HealthProbe>,
    gate: HealthGate,
    waiter: AvailabilityWaiter,
    clients: ClientFactory,
    shutdown: CancellationToken,
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
}

impl ProxyPool {
    /// Create an empty pool. Nothing is provisioned until `ensure` is called.
    pub fn new(
        config: ProxyPoolConfig,
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn HealthProbe>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            selector: RoundRobin::new(),
            provisioner,
            probe,
            gate: HealthGate::new(config.health_gate.clone()),
            waiter: AvailabilityWaiter::new(config.wait_poll_interval),
            clients: ClientFactory::from_config(&config),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Create a pool, adopt already-running endpoints and start filling it
    /// up to `target_pool_size`.
    pub async fn start(
        config: ProxyPoolConfig,
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn HealthProbe>,
    ) -> Result<Arc<Self>> {
        let pool = Self::new(config, provisioner, probe);

        let adopted = pool.adopt_discovered().await;
        let batch = pool.ensure(pool.config.target_pool_size).await?;
        info!(
            "Proxy pool started: {} adopted, {} provisioning",
            adopted,
            batch.len()
        );

        Ok(pool)
    }

    /// Health-check endpoints the provisioner already knows about and add
    /// the ones that pass. Returns how many joined.
    pub async fn adopt_discovered(self: &Arc<Self>) -> usize {
        let found = match self.provisioner.discover().await {
            Ok(found) => found,
            Err(e) => {
                warn!("Discovery via {} failed: {:#}", self.provisioner.name(), e);
                return 0;
            }
        };
        if found.is_empty() {
            return 0;
        }

        info!(
            "Discovered {} existing endpoints via {}",
            found.len(),
            self.provisioner.name()
        );
        let epoch = self.registry.read().epoch;
        let results =
            future::join_all(found.into_iter().map(|e| self.admit(e, epoch, false))).await;
        results.iter().filter(|r| r.is_ok()).count()
    }

    /// Grow or shrink the pool toward `target`.
    ///
    /// Missing endpoints are provisioned by independent tasks; surplus ready
    /// endpoints are stopped before this returns. Provisions still in flight
    /// are not counted as surplus here; `admit` drops them if they finish
    /// with the pool already at target.
    pub async fn ensure(self: &Arc<Self>, target: usize) -> Result<ProvisionBatch> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let (missing, surplus, epoch) = {
            let mut reg = self.registry.write();
            reg.target = target;

            let excess = reg
                .count(EndpointState::Ready)
                .min(reg.admitted().saturating_sub(target));
            let mut surplus = Vec::with_capacity(excess);
            for endpoint in reg.members.iter_mut().filter(|e| e.is_ready()).take(excess) {
                endpoint.apply(EndpointEvent::StopRequested)?;
                surplus.push(endpoint.id().clone());
            }

            let missing = target.saturating_sub(reg.live());
            reg.pending += missing;

            (missing, surplus, reg.epoch)
        };

        for id in &surplus {
            info!("Stopping surplus endpoint {}", id);
            self.finish_stop(id).await?;
        }

        if missing > 0 {
            info!(
                "Provisioning {} endpoints via {} (target {})",
                missing,
                self.provisioner.name(),
                target
            );
        }
        let handles = (0..missing)
            .map(|_| tokio::spawn(Arc::clone(self).provision_one(epoch)))
            .collect();

        Ok(ProvisionBatch { handles })
    }

    async fn provision_one(self: Arc<Self>, epoch: u64) -> Result<EndpointId> {
        let slot = PendingSlot::new(&self.registry);
        match self.provisioner.provision().await {
            Ok(endpoint) => {
                slot.hand_over();
                self.admit(endpoint, epoch, true).await
            }
            Err(e) => {
                drop(slot);
                warn!("Provisioner {} failed: {:#}", self.provisioner.name(), e);
                Err(PoolError::Provision(e))
            }
        }
    }

    /// Register a provisioned endpoint and run it through the health gate.
    async fn admit(&self, endpoint: Endpoint, epoch: u64, was_pending: bool) -> Result<EndpointId> {
        let endpoint = match self.config.max_requests_per_second {
            Some(rps) => endpoint.with_rate_limit(rps),
            None => endpoint,
        };
        let id = endpoint.id().clone();

        let rejected = {
            let mut reg = self.registry.write();
            if was_pending {
                reg.pending = reg.pending.saturating_sub(1);
            }
            if reg.epoch != epoch {
                Some(PoolError::Superseded(id.clone()))
            } else if reg.position(&id).is_some() {
                Some(PoolError::DuplicateEndpoint(id.clone()))
            } else if was_pending && reg.admitted() >= reg.target {
                Some(PoolError::Surplus(id.clone()))
            } else {
                reg.members.push(endpoint.clone());
                None
            }
        };

        if let Some(err) = rejected {
            warn!("Discarding endpoint {}: {}", id, err);
            if matches!(err, PoolError::Superseded(_) | PoolError::Surplus(_)) {
                self.release(&id).await;
            }
            return Err(err);
        }

        debug!("{} provisioned by {}, checking health", id, self.provisioner.name());
        let healthy = self.gate.validate(&endpoint, self.probe.as_ref()).await;
        let event = if healthy {
            EndpointEvent::HealthPassed
        } else {
            EndpointEvent::Aborted
        };

        let state = {
            let mut reg = self.registry.write();
            match reg.position(&id) {
                Some(pos) if reg.members[pos].state() == EndpointState::Provisioning => {
                    let state = reg.members[pos].apply(event)?;
                    if state == EndpointState::Stopped {
                        reg.members.remove(pos);
                    }
                    Some(state)
                }
                _ => None,
            }
        };

        match state {
            Some(EndpointState::Ready) => {
                info!("{} ready", id);
                Ok(id)
            }
            Some(_) => {
                warn!("{} never routed traffic, provisioning wasted", id);
                self.release(&id).await;
                Err(PoolError::HealthCheckFailed {
                    id,
                    attempts: self.gate.attempts(),
                })
            }
            None => {
                debug!("{} was removed while its health check ran", id);
                Err(PoolError::Superseded(id))
            }
        }
    }

    /// Deprovision, logging rather than failing.
    async fn release(&self, id: &EndpointId) -> bool {
        match self.provisioner.deprovision(id).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to deprovision {}: {:#}", id, e);
                false
            }
        }
    }

    /// Deprovision a blocked or stopping member and drop it from the registry.
    async fn finish_stop(&self, id: &EndpointId) -> Result<()> {
        self.release(id).await;

        let mut reg = self.registry.write();
        if let Some(pos) = reg.position(id) {
            let endpoint = &mut reg.members[pos];
            endpoint.apply(EndpointEvent::Deprovisioned)?;
            info!(
                "{} stopped after {} requests",
                endpoint.id(),
                endpoint.request_count()
            );
            reg.members.remove(pos);
        }
        Ok(())
    }

    fn select(&self) -> Option<Endpoint> {
        let reg = self.registry.read();
        self.selector.select(&reg.members).cloned()
    }

    /// Next ready endpoint in rotation, waiting for one if none is ready.
    pub async fn next(&self) -> Result<Endpoint> {
        if let Some(endpoint) = self.select() {
            return Ok(endpoint);
        }

        if self.wait_for(1, self.config.wait_timeout, None).await == WaitOutcome::Cancelled {
            return Err(PoolError::Cancelled);
        }
        self.select().ok_or(PoolError::NoProxyAvailable)
    }

    /// Next ready endpoint paired with a client routed through it.
    pub async fn client(&self) -> Result<BoundClient> {
        let endpoint = self.next().await?;
        self.clients.bind(endpoint)
    }

    /// The factory used for endpoint-bound clients.
    pub fn clients(&self) -> &ClientFactory {
        &self.clients
    }

    /// Report `id_or_address` as blocked and replace it.
    ///
    /// Returns `true` for the one caller that performed the replacement;
    /// everyone else racing on the same endpoint gets `false`.
    pub async fn block(self: &Arc<Self>, id_or_address: &str) -> Result<bool> {
        let id = EndpointId::from_address(id_or_address);

        let claimed = {
            let mut reg = self.registry.write();
            match reg.position(&id) {
                Some(pos) if reg.members[pos].is_ready() => {
                    let endpoint = &mut reg.members[pos];
                    endpoint.apply(EndpointEvent::FailureReported)?;
                    Ok(endpoint.request_count())
                }
                Some(pos) => Err(Some(reg.members[pos].state())),
                None => Err(None),
            }
        };

        let requests = match claimed {
            Ok(requests) => requests,
            Err(Some(state)) => {
                info!("{} is already {:?}, not blocking again", id, state);
                return Ok(false);
            }
            Err(None) => {
                info!("{} already replaced", id);
                return Ok(false);
            }
        };

        warn!("Blocking {} after {} requests", id, requests);
        self.finish_stop(&id).await?;

        let target = self.target();
        if let Err(e) = self.ensure(target).await {
            warn!("Could not backfill after blocking {}: {}", id, e);
        }
        Ok(true)
    }

    /// Stop a ready endpoint without replacing it.
    ///
    /// The target shrinks by one so the next `ensure` does not refill it.
    pub async fn remove(&self, id_or_address: &str) -> Result<bool> {
        let id = EndpointId::from_address(id_or_address);

        let found = {
            let mut reg = self.registry.write();
            match reg.position(&id) {
                Some(pos) if reg.members[pos].is_ready() => {
                    reg.members[pos].apply(EndpointEvent::StopRequested)?;
                    reg.target = reg.target.saturating_sub(1);
                    true
                }
                _ => false,
            }
        };

        if !found {
            info!("{} is not a ready member, nothing to remove", id);
            return Ok(false);
        }
        self.finish_stop(&id).await?;
        Ok(true)
    }

    /// Stop and deprovision every member.
    ///
    /// Best effort: a failed deprovision is logged and the rest carry on.
    /// Blocked members are finished by the `block` call that claimed them.
    pub async fn stop_all(&self) {
        let doomed: Vec<Endpoint> = {
            let mut reg = self.registry.write();
            reg.epoch += 1;
            reg.target = 0;
            std::mem::take(&mut reg.members)
                .into_iter()
                .filter_map(|mut endpoint| {
                    let event = match endpoint.state() {
                        EndpointState::Ready => EndpointEvent::StopRequested,
                        EndpointState::Provisioning => EndpointEvent::Aborted,
                        _ => return None,
                    };
                    endpoint.apply(event).ok().map(|_| endpoint)
                })
                .collect()
        };

        info!("Stopping {} endpoints", doomed.len());
        future::join_all(doomed.into_iter().map(|mut endpoint| async move {
            self.release(endpoint.id()).await;
            if endpoint.state() == EndpointState::Stopping {
                if let Err(e) = endpoint.apply(EndpointEvent::Deprovisioned) {
                    error!("{} could not finish stopping: {}", endpoint.id(), e);
                }
            }
            info!(
                "{} stopped after {} requests",
                endpoint.id(),
                endpoint.request_count()
            );
        }))
        .await;
    }

    /// Cancel every wait, end the supervisor and stop all endpoints.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop_all().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Keep calling `ensure` with the current target every `interval`
    /// until the pool is shut down.
    pub fn supervise(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pool.shutdown.cancelled() => break,
                    _ = time::sleep(interval) => {}
                }

                match pool.ensure(pool.target()).await {
                    Ok(batch) if !batch.is_empty() => {
                        info!("Supervisor backfilling {} endpoints", batch.len());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Supervisor could not ensure pool size: {}", e),
                }

                let stats = pool.stats();
                info!(
                    "Proxy pool status update: {}/{} ready, {} provisioning",
                    stats.ready,
                    stats.target,
                    stats.provisioning + stats.pending
                );
            }
            debug!("Pool supervisor stopped");
        })
    }

    async fn wait_for(
        &self,
        n: usize,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> WaitOutcome {
        let wait = self
            .waiter
            .wait_until(n, timeout, || self.ready_count(), &self.shutdown);
        match cancel {
            Some(cancel) => tokio::select! {
                outcome = wait => outcome,
                _ = cancel.cancelled() => WaitOutcome::Cancelled,
            },
            None => wait.await,
        }
    }

    /// Wait until at least `n` endpoints are ready; `false` on timeout.
    pub async fn wait_ready(&self, n: usize, timeout: Duration) -> bool {
        self.wait_for(n, timeout, None).await.is_ready()
    }

    /// Like `wait_ready`, but also stops when `cancel` fires.
    pub async fn wait_ready_or_cancel(
        &self,
        n: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        self.wait_for(n, timeout, Some(cancel)).await
    }

    /// Wait until at least `n` endpoints are ready, failing on timeout.
    pub async fn require_ready(&self, n: usize, timeout: Duration) -> Result<()> {
        match self.wait_for(n, timeout, None).await {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::TimedOut { ready } => Err(PoolError::AvailabilityTimeout {
                wanted: n,
                ready,
                waited: timeout,
            }),
            WaitOutcome::Cancelled => Err(PoolError::Cancelled),
        }
    }

    /// Count one successful request through `id`.
    pub(crate) fn record_request(&self, id: &EndpointId) {
        let mut reg = self.registry.write();
        if let Some(pos) = reg.position(id) {
            reg.members[pos].record_request();
        }
    }

    pub fn ready_count(&self) -> usize {
        self.registry.read().count(EndpointState::Ready)
    }

    pub fn target(&self) -> usize {
        self.registry.read().target
    }

    /// Members in rotation order.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.registry.read().members.clone()
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        let reg = self.registry.read();
        PoolStats {
            total: reg.members.len(),
            ready: reg.count(EndpointState::Ready),
            provisioning: reg.count(EndpointState::Provisioning),
            blocked: reg.count(EndpointState::Blocked),
            stopping: reg.count(EndpointState::Stopping),
            pending: reg.pending,
            target: reg.target,
        }
    }
}
