//! Round-robin selection over ready endpoints.

use crate::endpoint::Endpoint;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out ready endpoints in insertion order.
///
/// The cursor is atomic so selection only needs shared access to the
/// member list.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next ready member, or `None` if nothing is ready.
    pub fn select<'a>(&self, members: &'a [Endpoint]) -> Option<&'a Endpoint> {
        let ready: Vec<&Endpoint> = members.iter().filter(|e| e.is_ready()).collect();
        if ready.is_empty() {
            return None;
        }

        let len = ready.len();
        // `fetch_update` cannot fail when the closure always returns `Some`.
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some((c % len + 1) % len)
            })
            .unwrap_or_else(|c| c);

        ready.get(previous % len).copied()
    }

    /// Current cursor position, for diagnostics.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}
