//! Waiting for enough endpoints to become ready.

use log::{debug, warn};
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The requested count was reached.
    Ready,
    /// The deadline passed with only `ready` endpoints available.
    TimedOut { ready: usize },
    /// The wait was cancelled before either of the above.
    Cancelled,
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready)
    }
}

/// Polls a ready count until it reaches a threshold.
#[derive(Debug, Clone)]
pub struct AvailabilityWaiter {
    poll_interval: Duration,
}

impl AvailabilityWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Poll `count` until it reaches `n`, `timeout` elapses, or `cancel` fires.
    ///
    /// A timeout too large to represent as a deadline waits until cancelled.
    pub async fn wait_until<F>(
        &self,
        n: usize,
        timeout: Duration,
        count: F,
        cancel: &CancellationToken,
    ) -> WaitOutcome
    where
        F: Fn() -> usize,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut warned = false;

        loop {
            let ready = count();
            if ready >= n {
                return WaitOutcome::Ready;
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                debug!("Gave up waiting for {} endpoints, {} ready", n, ready);
                return WaitOutcome::TimedOut { ready };
            }

            if !warned {
                warn!("Waiting for {} ready endpoints, {} available", n, ready);
                warned = true;
            }

            let wake = match (now.checked_add(self.poll_interval), deadline) {
                (Some(poll), Some(deadline)) => Some(poll.min(deadline)),
                (poll, deadline) => poll.or(deadline),
            };
            match wake {
                Some(wake) => tokio::select! {
                    _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                    _ = time::sleep_until(wake) => {}
                },
                None => {
                    cancel.cancelled().await;
                    return WaitOutcome::Cancelled;
                }
            }
        }
    }
}
