use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Dispatch counters, updated lock-free from every cycle.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    claimed: AtomicU64,
    dropped: AtomicU64,
    plugin_errors: AtomicU64,
    faults: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Updates taken off the queue.
    pub received: u64,
    /// Cycles that ran to completion.
    pub dispatched: u64,
    pub claimed: u64,
    /// Updates never dispatched (shutdown or admission failure).
    pub dropped: u64,
    pub plugin_errors: u64,
    /// Cycles that panicked.
    pub faults: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, claimed: bool, plugin_errors: usize) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if claimed {
            self.claimed.fetch_add(1, Ordering::Relaxed);
        }
        self.plugin_errors
            .fetch_add(plugin_errors as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            plugin_errors: self.plugin_errors.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let stats = DispatchStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_dispatched(true, 0);
        stats.record_dispatched(false, 2);
        stats.record_fault();
        stats.record_dropped();
        assert_eq!(stats.snapshot(), StatsSnapshot {
            received: 2,
            dispatched: 2,
            claimed: 1,
            dropped: 1,
            plugin_errors: 2,
            faults: 1,
        });
    }
}
