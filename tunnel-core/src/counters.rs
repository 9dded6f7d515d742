//! Lock-free, informational-only counters. Never consulted for correctness
//! decisions (flow control and Mux lifecycle own those) -- purely fodder
//! for the periodic structured-logging tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Default)]
pub struct TunnelCounters {
    carriers_created: AtomicU64,
    streams_created: AtomicU64,
    streams_io_errors: AtomicU64,
    active_external_conns: AtomicU64,
    active_client_carriers: AtomicU64,
}

/// A point-in-time, serializable view of [`TunnelCounters`] suitable for a
/// single `tracing::info!` structured log line.
#[derive(Debug, Serialize)]
pub struct CountersSnapshot {
    pub carriers_created: u64,
    pub streams_created: u64,
    pub streams_io_errors: u64,
    pub active_external_conns: u64,
    pub active_client_carriers: u64,
}

impl TunnelCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_carriers_created(&self) {
        self.carriers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_streams_created(&self) {
        self.streams_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_streams_io_errors(&self) {
        self.streams_io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_active_external_conns(&self) {
        self.active_external_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_external_conns(&self) {
        self.active_external_conns.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_active_client_carriers(&self, n: u64) {
        self.active_client_carriers.store(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            carriers_created: self.carriers_created.load(Ordering::Relaxed),
            streams_created: self.streams_created.load(Ordering::Relaxed),
            streams_io_errors: self.streams_io_errors.load(Ordering::Relaxed),
            active_external_conns: self.active_external_conns.load(Ordering::Relaxed),
            active_client_carriers: self.active_client_carriers.load(Ordering::Relaxed),
        }
    }
}
