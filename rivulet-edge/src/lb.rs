//! Round-robin selection over the configured origin servers.

use crate::config::Origin;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Monotonic counter modulo origin count; the last pick stays recoverable
/// through [`RoundRobinLb::selected`] for reconnects.
pub struct RoundRobinLb {
    origins: Vec<Origin>,
    count: AtomicUsize,
    current: AtomicUsize,
}

impl RoundRobinLb {
    pub fn new(origins: Vec<Origin>) -> Self {
        RoundRobinLb {
            origins,
            count: AtomicUsize::new(0),
            current: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Pick the next origin; distinct callers get distinct indices.
    pub fn select(&self) -> Option<Origin> {
        if self.origins.is_empty() {
            return None;
        }
        let index = self.count.fetch_add(1, Ordering::Relaxed) % self.origins.len();
        self.current.store(index, Ordering::Relaxed);
        Some(self.origins[index].clone())
    }

    /// The origin of the most recent [`RoundRobinLb::select`] call.
    pub fn selected(&self) -> Option<Origin> {
        let index = self.current.load(Ordering::Relaxed);
        self.origins.get(index).cloned()
    }
}
