//! Error types for the rotating-proxy-pool crate.

use crate::endpoint::{EndpointEvent, EndpointId, EndpointState};

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the pool.
pub type Result<T, E = PoolError> = std::result::Result<T, E>;

/// Errors raised by the pool and its collaborators.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The provisioner could not create an endpoint.
    #[error("failed to provision endpoint: {0}")]
    Provision(#[source] anyhow::Error),

    /// A provisioned endpoint never became routable.
    #[error("endpoint {id} failed its health check after {attempts} probes")]
    HealthCheckFailed { id: EndpointId, attempts: u32 },

    /// State machine misuse. Never retried.
    #[error("invalid endpoint transition from {from:?} on {event:?}")]
    InvalidTransition {
        from: EndpointState,
        event: EndpointEvent,
    },

    /// Fewer endpoints than requested were ready when the wait ran out.
    #[error("only {ready} of {wanted} endpoints ready after {waited:?}")]
    AvailabilityTimeout {
        wanted: usize,
        ready: usize,
        waited: Duration,
    },

    /// No endpoint became ready in time for a selection.
    #[error("No proxy available in pool")]
    NoProxyAvailable,

    /// The wait was cancelled or the pool was shut down.
    #[error("pool operation cancelled")]
    Cancelled,

    /// The provisioner returned an endpoint that is already a member.
    #[error("endpoint {0} is already in the pool")]
    DuplicateEndpoint(EndpointId),

    /// The pool was stopped while the endpoint was being provisioned.
    #[error("endpoint {0} was provisioned for a pool that has since been stopped")]
    Superseded(EndpointId),

    /// A provision finished after the target was lowered and is not needed.
    #[error("endpoint {0} is surplus to the current target")]
    Surplus(EndpointId),

    /// A client routed through an endpoint could not be built.
    #[error("failed to build client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Signal from an operation that its endpoint is blocked or rate-limited
/// and should be replaced.
#[derive(Debug, Clone, Error)]
#[error("endpoint rejected: {reason}")]
pub struct ProxyError {
    reason: String,
}

impl ProxyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Outcome of a single operation attempt.
///
/// Only the `Proxy` variant is retried; `Application` errors go straight
/// back to the caller.
#[derive(Debug, Error)]
pub enum OperationError<E> {
    #[error(transparent)]
    Proxy(ProxyError),
    #[error("{0}")]
    Application(E),
}

impl<E> From<ProxyError> for OperationError<E> {
    fn from(err: ProxyError) -> Self {
        OperationError::Proxy(err)
    }
}

/// Error returned by the retry executor.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The operation's own error, unchanged.
    #[error("{0}")]
    Application(E),

    /// Every attempt ended with a `ProxyError`.
    #[error("gave up after {attempts} attempts")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: ProxyError,
    },

    /// The pool could not hand out an endpoint.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl<E> ExecuteError<E> {
    /// Returns the application error, if that is what ended the call.
    pub fn into_application(self) -> Option<E> {
        match self {
            ExecuteError::Application(e) => Some(e),
            _ => None,
        }
    }
}
