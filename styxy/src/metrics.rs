//! Process-local metrics.
//!
//! Counters are plain in-memory totals surfaced through `/status`; there
//! is no exporter. The interesting one is `port_conflicts_detected`,
//! labelled by service type, which counts candidates skipped because a
//! foreign listener held the port.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Shared counter set.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    port_conflicts_detected: BTreeMap<String, u64>,
    allocations_total: u64,
    releases_total: u64,
    stale_cleanups_total: u64,
    auto_allocations_total: u64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Probe-detected conflicts per service type.
    pub port_conflicts_detected: BTreeMap<String, u64>,
    /// Successful allocations since start.
    pub allocations_total: u64,
    /// Successful releases since start.
    pub releases_total: u64,
    /// Allocations released by the reaper.
    pub stale_cleanups_total: u64,
    /// Service types created by auto-allocation.
    pub auto_allocations_total: u64,
}

impl Metrics {
    /// Creates a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a probe-detected conflict for a service type.
    pub fn record_port_conflict(&self, service_type: &str) {
        *self
            .inner
            .lock()
            .port_conflicts_detected
            .entry(service_type.to_string())
            .or_insert(0) += 1;
    }

    /// Counts a successful allocation.
    pub fn record_allocation(&self) {
        self.inner.lock().allocations_total += 1;
    }

    /// Counts a successful release.
    pub fn record_release(&self) {
        self.inner.lock().releases_total += 1;
    }

    /// Counts a reaper cleanup.
    pub fn record_stale_cleanup(&self) {
        self.inner.lock().stale_cleanups_total += 1;
    }

    /// Counts an auto-allocated service type.
    pub fn record_auto_allocation(&self) {
        self.inner.lock().auto_allocations_total += 1;
    }

    /// Returns the conflict count for one service type.
    #[must_use]
    pub fn port_conflicts_for(&self, service_type: &str) -> u64 {
        self.inner
            .lock()
            .port_conflicts_detected
            .get(service_type)
            .copied()
            .unwrap_or(0)
    }

    /// Copies out all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            port_conflicts_detected: inner.port_conflicts_detected.clone(),
            allocations_total: inner.allocations_total,
            releases_total: inner.releases_total,
            stale_cleanups_total: inner.stale_cleanups_total,
            auto_allocations_total: inner.auto_allocations_total,
        }
    }
}

/// Resident set size of this process in bytes, when the platform exposes
/// it.
#[must_use]
pub fn resident_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
                return Some(kib * 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
