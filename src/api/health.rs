//! Shared health state for the /health endpoint.
//! Updated by KeepaClient, the scan pipeline, and DecisionWriter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared health counters. Updated by service components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// Number of /product requests sent to Keepa.
    pub keepa_requests: AtomicU64,
    /// Nanosecond timestamp of the last completed filter run (0 = none).
    pub last_run_at_ns: AtomicU64,
    /// Runs queued for the decision log but not yet written.
    pub write_queue_pending: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub keepa_requests: u64,
    pub last_run_at_ns: Option<u64>,
    pub write_queue_pending: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_keepa_requests(&self) {
        self.keepa_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_run_at_ns(&self, ns: u64) {
        self.last_run_at_ns.store(ns, Ordering::Relaxed);
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        // Saturates at zero.
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_run_at_ns.load(Ordering::Relaxed);
        HealthSnapshot {
            status: "ok",
            keepa_requests: self.keepa_requests.load(Ordering::Relaxed),
            last_run_at_ns: (last != 0).then_some(last),
            write_queue_pending: self.write_queue_pending.load(Ordering::Relaxed),
        }
    }
}
