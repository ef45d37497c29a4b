//! The health reaper.
//!
//! A single background timer sweeps the registry: allocations whose owner
//! process is gone, or whose port nothing listens on, accumulate failure
//! counts and are released once they stay unhealthy for `max_failures`
//! consecutive sweeps. Healthy sightings reset the count. The reaper
//! reads the registry without blocking allocations and releases through
//! the same write path as an explicit release.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::AuditAction;
use crate::daemon::Daemon;
use crate::process::pid_alive;
use crate::registry::Allocation;

/// Age threshold for forced cleanup, in seconds. Allocations older than
/// this are released by a forced sweep even when they still look
/// healthy.
pub const FORCE_MAX_AGE_SECS: i64 = 3600;

/// One released allocation in a sweep report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReapedAllocation {
    /// The freed port.
    pub port: u16,
    /// Service type of the released allocation.
    pub service_type: String,
    /// Consecutive unhealthy sweeps at release time.
    pub failures: u32,
    /// Why the allocation was released.
    pub reason: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Allocations examined.
    pub checked: usize,
    /// Allocations released this sweep.
    pub released: Vec<ReapedAllocation>,
    /// Instances expired for missing heartbeats.
    pub instances_expired: usize,
}

/// Failure-count state shared across sweeps.
#[derive(Debug, Default)]
pub struct HealthReaper {
    failures: Mutex<HashMap<u16, u32>>,
}

impl HealthReaper {
    /// Creates a reaper with no accumulated failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current failure count for a port, for diagnostics.
    #[must_use]
    pub fn failures_for(&self, port: u16) -> u32 {
        self.failures.lock().get(&port).copied().unwrap_or(0)
    }

    /// Runs one sweep over the daemon's registry and instance table.
    ///
    /// With `force`, allocations older than [`FORCE_MAX_AGE_SECS`] are
    /// released regardless of health.
    pub fn sweep(&self, daemon: &Daemon, force: bool) -> CleanupReport {
        let config = daemon.health_monitoring_config();
        let allocations = daemon.registry().read().list_all();
        let mut report = CleanupReport {
            checked: allocations.len(),
            ..CleanupReport::default()
        };

        for allocation in allocations {
            let health = self.examine(daemon, &allocation);
            let aged = force
                && Utc::now() - allocation.allocated_at
                    > chrono::Duration::seconds(FORCE_MAX_AGE_SECS);
            let port = allocation.port.value();

            let failures = match health {
                Health::Healthy if !aged => {
                    self.failures.lock().remove(&port);
                    continue;
                }
                Health::Healthy => {
                    // Forced aging releases immediately; the counter is
                    // not part of that decision.
                    self.failures.lock().get(&port).copied().unwrap_or(0)
                }
                Health::Unhealthy(_) => {
                    let mut failures = self.failures.lock();
                    let count = failures.entry(port).or_insert(0);
                    *count += 1;
                    *count
                }
            };

            let reason = match (&health, aged) {
                (Health::Unhealthy(reason), _) => (*reason).to_string(),
                (Health::Healthy, true) => "aged out by forced cleanup".to_string(),
                (Health::Healthy, false) => continue,
            };

            let release = aged
                || (matches!(health, Health::Unhealthy(_))
                    && failures >= config.max_failures
                    && config.cleanup_stale_allocations);
            if !release {
                tracing::debug!(
                    port,
                    service_type = %allocation.service_type,
                    failures,
                    "allocation unhealthy, not yet at release threshold"
                );
                continue;
            }

            if daemon
                .registry()
                .write()
                .release(&allocation.lock_id)
                .is_some()
            {
                self.failures.lock().remove(&port);
                daemon.metrics().record_stale_cleanup();
                daemon.audit_event(
                    AuditAction::StaleAllocationCleaned,
                    json!({
                        "port": port,
                        "service_type": allocation.service_type,
                        "failures": failures,
                        "reason": reason,
                    }),
                );
                daemon.mark_dirty();
                tracing::info!(
                    port,
                    service_type = %allocation.service_type,
                    failures,
                    reason,
                    "released stale allocation"
                );
                report.released.push(ReapedAllocation {
                    port,
                    service_type: allocation.service_type.clone(),
                    failures,
                    reason,
                });
            }
        }

        // Heartbeat expiry shares the sweep cadence.
        let ttl = chrono::Duration::milliseconds(config.instance_ttl_ms as i64);
        let expired = daemon.instances().write().expire_stale(ttl, Utc::now());
        for instance in &expired {
            daemon.audit_event(
                AuditAction::InstanceExpired,
                json!({"instance_id": instance.instance_id}),
            );
        }
        if !expired.is_empty() {
            daemon.mark_dirty();
        }
        report.instances_expired = expired.len();
        report
    }

    fn examine(&self, daemon: &Daemon, allocation: &Allocation) -> Health {
        if let Some(pid) = allocation.process_id {
            if !pid_alive(pid) {
                return Health::Unhealthy("owner process gone");
            }
        }
        // A bindable port means nothing is listening behind the
        // reservation.
        if daemon.prober().probe(allocation.port) {
            return Health::Unhealthy("port not bound");
        }
        Health::Healthy
    }
}

enum Health {
    Healthy,
    Unhealthy(&'static str),
}

/// Handle to the background reaper thread.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stops the timer and joins the thread.
    pub fn stop(mut self) {
        self.signal_shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn signal_shutdown(&self) {
        let (lock, condvar) = &*self.shutdown;
        *lock.lock() = true;
        condvar.notify_all();
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.signal_shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawns the periodic reaper for a daemon.
///
/// The interval is re-read from the daemon's settings on every tick, so a
/// config reload takes effect without a restart.
pub fn spawn_reaper(daemon: Arc<Daemon>) -> ReaperHandle {
    let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
    let thread_shutdown = Arc::clone(&shutdown);

    let thread = std::thread::Builder::new()
        .name("styxy-reaper".into())
        .spawn(move || loop {
            let interval =
                Duration::from_millis(daemon.health_monitoring_config().check_interval_ms.max(1));

            {
                let (lock, condvar) = &*thread_shutdown;
                let mut stopped = lock.lock();
                if !*stopped {
                    condvar.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }

            if daemon.health_monitoring_config().enabled {
                daemon.run_health_sweep(false);
            }
        })
        .ok();

    ReaperHandle {
        shutdown,
        thread,
    }
}
