//! The daemon state container.
//!
//! One [`Daemon`] value owns every component: catalogue, registry,
//! instances, observations, config writer, prober, audit log, metrics,
//! and the reaper's failure counters. The HTTP surface is a thin layer
//! over the methods here, and the whole container is torn down cleanly at
//! shutdown rather than living in module-level statics.
//!
//! Concurrency: the registry sits behind one reader-writer lock and every
//! mutation goes through its write side, which makes
//! [`crate::registry::AllocationRegistry::reserve`] the linearization
//! point. Probes and config-lock waits happen with no registry lock held.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::allocator::{candidate_ports, AllocationOutcome, AllocationRequest};
use crate::audit::{AuditAction, AuditLog};
use crate::autoalloc::{compute_range, overlaps_any, resolve_rule};
use crate::catalogue::{Catalogue, ServiceType};
use crate::config::schema::{
    AutoAllocationConfig, AutoAllocationRule, HealthMonitoringConfig, RecoveryConfig,
    ServiceTypeConfig, UserConfig,
};
use crate::config::{self, ConfigPaths, ConfigWriter};
use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceRegistration, InstanceRegistry};
use crate::metrics::{resident_memory_bytes, Metrics, MetricsSnapshot};
use crate::observe::{Observation, ObservationStats, ObservationStore};
use crate::port::{Port, PortRange};
use crate::probe::{PortProber, SystemProber};
use crate::reaper::{CleanupReport, HealthReaper};
use crate::recovery::{self, RecoveryReport};
use crate::registry::{
    Allocation, AllocationRegistry, LockId, ReserveOutcome, SingletonRef,
};
use crate::snapshot::{SaveSignal, Snapshot, SnapshotStore};

/// Runtime-reloadable settings distilled from the user config.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Auto-allocation knobs.
    pub auto_allocation: AutoAllocationConfig,
    /// Auto-allocation overrides, first match wins.
    pub rules: Vec<AutoAllocationRule>,
    /// Conflict, reaper, and recovery policies.
    pub recovery: RecoveryConfig,
}

impl RuntimeSettings {
    fn from_user(user: &UserConfig) -> Self {
        Self {
            auto_allocation: user.auto_allocation.clone(),
            rules: user.auto_allocation_rules.clone(),
            recovery: user.recovery.clone(),
        }
    }
}

/// Options for constructing a daemon.
#[derive(Default)]
pub struct DaemonOptions {
    /// Config directory override; env and `~/.styxy` apply otherwise.
    pub config_dir: Option<PathBuf>,
    /// Prober override, used by tests to avoid real sockets.
    pub prober: Option<Arc<dyn PortProber>>,
    /// Version stamped into snapshots and `/status`.
    pub version: Option<String>,
}

impl std::fmt::Debug for DaemonOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonOptions")
            .field("config_dir", &self.config_dir)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Combined registry-and-probe view of one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCheck {
    /// The inspected port.
    pub port: Port,
    /// True when the port is neither reserved nor held by any listener.
    pub available: bool,
    /// The live allocation, if styxy manages this port.
    #[serde(default)]
    pub allocation: Option<Allocation>,
}

/// Reply to a suggestion query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestions {
    /// The service type the ports were drawn from.
    pub service_type: String,
    /// True when the requested type was unknown and the default range
    /// was used instead.
    pub fallback: bool,
    /// Candidate ports, most preferred first.
    pub ports: Vec<Port>,
}

/// Snapshot of daemon health for `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Crate version.
    pub version: String,
    /// Seconds since bootstrap.
    pub uptime_seconds: u64,
    /// Live allocations.
    pub allocation_count: usize,
    /// Registered instances.
    pub instance_count: usize,
    /// Distinct observed ports.
    pub observation_count: usize,
    /// Catalogue entries.
    pub service_type_count: usize,
    /// Resident memory, when the platform exposes it.
    #[serde(default)]
    pub memory_rss_bytes: Option<u64>,
    /// Counter snapshot.
    pub metrics: MetricsSnapshot,
    /// What startup recovery did.
    pub recovery: RecoveryReport,
}

/// The process-wide port coordination state.
pub struct Daemon {
    paths: ConfigPaths,
    version: String,
    catalogue: RwLock<Catalogue>,
    registry: RwLock<AllocationRegistry>,
    instances: RwLock<InstanceRegistry>,
    observations: RwLock<ObservationStore>,
    settings: RwLock<RuntimeSettings>,
    writer: ConfigWriter,
    prober: Arc<dyn PortProber>,
    audit: AuditLog,
    metrics: Metrics,
    reaper: HealthReaper,
    save: Arc<SaveSignal>,
    started: Instant,
    recovery_report: RecoveryReport,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("version", &self.version)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Builds the daemon: resolves paths, loads config, runs startup
    /// recovery, and restores the registry.
    ///
    /// # Errors
    ///
    /// Returns an error only for unrecoverable conditions (unusable
    /// config directory). Broken user configs and snapshots degrade to
    /// defaults with warnings.
    pub fn bootstrap(options: DaemonOptions) -> Result<Self> {
        let paths = ConfigPaths::resolve(options.config_dir.as_deref())?;
        paths.ensure()?;

        let version = options
            .version
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        let prober = options
            .prober
            .unwrap_or_else(|| Arc::new(SystemProber::new()) as Arc<dyn PortProber>);
        let audit = AuditLog::new(paths.audit_log_file());

        let (user, catalogue, config_status) = match config::load(&paths) {
            Ok(effective) => {
                for warning in &effective.warnings {
                    tracing::warn!(warning = %warning, "config warning");
                }
                (effective.user, effective.catalogue, Ok(()))
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(error = %message, "user config rejected, using defaults");
                (UserConfig::default(), Catalogue::shipped(), Err(message))
            }
        };

        let store = SnapshotStore::new(paths.snapshot_file());
        let system_recovery = user.recovery.system_recovery.clone();
        let recovery_catalogue = catalogue.clone();
        let is_single =
            move |name: &str| recovery_catalogue.get(name).is_some_and(ServiceType::is_single);

        let (registry, instances, report) =
            if system_recovery.enabled && system_recovery.run_on_startup {
                let outcome = recovery::run(
                    &store,
                    &config_status,
                    &system_recovery,
                    prober.as_ref(),
                    &is_single,
                );
                if let Err(err) = audit.append(
                    AuditAction::SystemRecoveryComplete,
                    outcome.report.audit_context(),
                ) {
                    tracing::warn!(error = %err, "could not write recovery audit event");
                }
                (outcome.registry, outcome.instances, outcome.report)
            } else {
                // Recovery disabled: restore whatever decodes, repair
                // nothing.
                match store.read() {
                    Ok(Some(snapshot)) => (
                        AllocationRegistry::rebuild(snapshot.allocations, &is_single),
                        snapshot.instances,
                        RecoveryReport::default(),
                    ),
                    Ok(None) => (
                        AllocationRegistry::new(),
                        Vec::new(),
                        RecoveryReport::default(),
                    ),
                    Err(err) => {
                        tracing::warn!(error = %err, "snapshot unreadable and recovery disabled; starting empty");
                        (
                            AllocationRegistry::new(),
                            Vec::new(),
                            RecoveryReport::default(),
                        )
                    }
                }
            };

        Ok(Self {
            writer: ConfigWriter::new(paths.clone()),
            paths,
            version,
            catalogue: RwLock::new(catalogue),
            registry: RwLock::new(registry),
            instances: RwLock::new(InstanceRegistry::from_instances(instances)),
            observations: RwLock::new(ObservationStore::new()),
            settings: RwLock::new(RuntimeSettings::from_user(&user)),
            prober,
            audit,
            metrics: Metrics::new(),
            reaper: HealthReaper::new(),
            save: Arc::new(SaveSignal::new()),
            started: Instant::now(),
            recovery_report: report,
        })
    }

    /// Allocates a single port.
    ///
    /// The candidate list is the explicit preferred port, the type's
    /// preferred ports, then its range ascending. Candidates held in the
    /// registry or by a foreign listener are skipped; the first one that
    /// survives the atomic reservation wins. Unknown service types enter
    /// auto-allocation first when it is enabled.
    ///
    /// # Errors
    ///
    /// `unknownServiceType`, `noPortsAvailable`, plus whatever
    /// auto-allocation surfaces.
    pub fn allocate(&self, request: &AllocationRequest) -> Result<AllocationOutcome> {
        request.validate()?;

        let mut auto_allocated = false;
        let service = match self.resolve_service(&request.service_type) {
            Some(service) => service,
            None => {
                if !self.settings.read().auto_allocation.enabled {
                    return Err(Error::UnknownServiceType {
                        service_type: request.service_type.clone(),
                    });
                }
                // No registry or catalogue lock is held here; the
                // auto-allocator takes the config file lock on its own.
                self.auto_allocate(&request.service_type)?;
                auto_allocated = true;
                self.resolve_service(&request.service_type).ok_or_else(|| {
                    Error::UnknownServiceType {
                        service_type: request.service_type.clone(),
                    }
                })?
            }
        };

        if service.is_single() {
            let existing = self
                .registry
                .read()
                .singleton_for(&service.name)
                .map(|s| (s.port, s.lock_id));
            if let Some((port, lock_id)) = existing {
                return Ok(AllocationOutcome {
                    port,
                    lock_id: Some(lock_id),
                    existing: true,
                    auto_allocated,
                });
            }
        }

        let check_availability = {
            let settings = self.settings.read();
            settings.recovery.port_conflict.enabled
                && settings.recovery.port_conflict.check_availability
        };

        let candidates = candidate_ports(&service, request.preferred_port);
        let attempted = candidates.len();

        for port in candidates {
            if self.registry.read().lookup_by_port(port).is_some() {
                continue;
            }

            // Probe outside any registry lock; results are never cached.
            if check_availability && !self.prober.probe(port) {
                self.metrics.record_port_conflict(&service.name);
                self.observations.write().record(port, None, None);
                tracing::warn!(
                    service_type = %service.name,
                    port = port.value(),
                    "port conflict detected: candidate held by a foreign listener"
                );
                continue;
            }

            if request.dry_run {
                // A momentary view, no reservation. The port may be gone
                // by the time the caller acts on it.
                return Ok(AllocationOutcome {
                    port,
                    lock_id: None,
                    existing: false,
                    auto_allocated,
                });
            }

            let allocation = Allocation {
                port,
                lock_id: LockId::generate(),
                service_type: service.name.clone(),
                service_name: request.service_name.clone(),
                instance_id: request.instance_id.clone(),
                project_path: request.project_path.clone(),
                process_id: request.process_id,
                allocated_at: Utc::now(),
            };
            let lock_id = allocation.lock_id;

            let outcome = self
                .registry
                .write()
                .reserve(allocation, service.instance_mode);
            match outcome {
                ReserveOutcome::Reserved => {
                    self.enforce_invariants();
                    self.metrics.record_allocation();
                    self.audit_event(
                        AuditAction::Allocation,
                        json!({
                            "port": port.value(),
                            "service_type": service.name,
                            "instance_id": request.instance_id,
                        }),
                    );
                    self.save.mark_dirty();
                    return Ok(AllocationOutcome {
                        port,
                        lock_id: Some(lock_id),
                        existing: false,
                        auto_allocated,
                    });
                }
                // A concurrent writer beat us to this port; keep going.
                ReserveOutcome::PortTaken => continue,
                // A concurrent writer created the singleton first; its
                // allocation is the answer.
                ReserveOutcome::SingletonExists(existing) => {
                    return Ok(AllocationOutcome {
                        port: existing.port,
                        lock_id: Some(existing.lock_id),
                        existing: true,
                        auto_allocated,
                    });
                }
            }
        }

        Err(Error::NoPortsAvailable {
            service_type: service.name,
            attempted,
        })
    }

    /// Releases an allocation by lock id.
    ///
    /// # Errors
    ///
    /// Returns `lockNotFound` when no live allocation owns the id; a
    /// repeat release therefore reports it was already gone.
    pub fn release(&self, lock_id: &LockId) -> Result<Allocation> {
        let released = self.registry.write().release(lock_id);
        match released {
            Some(allocation) => {
                self.enforce_invariants();
                self.metrics.record_release();
                self.audit_event(
                    AuditAction::Release,
                    json!({
                        "port": allocation.port.value(),
                        "service_type": allocation.service_type,
                    }),
                );
                self.save.mark_dirty();
                Ok(allocation)
            }
            None => Err(Error::LockNotFound {
                lock_id: lock_id.to_string(),
            }),
        }
    }

    /// Combined registry-and-probe view of one port.
    #[must_use]
    pub fn check(&self, port: Port) -> PortCheck {
        let allocation = self.registry.read().lookup_by_port(port).cloned();
        let bindable = self.prober.probe(port);
        if allocation.is_none() && !bindable {
            // A foreign listener; remember the sighting.
            self.observations.write().record(port, None, None);
        }
        PortCheck {
            port,
            available: allocation.is_none() && bindable,
            allocation,
        }
    }

    /// [`Daemon::check`] over an inclusive port range.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` for an inverted or oversized range.
    pub fn scan(&self, start: Port, end: Port) -> Result<Vec<PortCheck>> {
        const MAX_SPAN: u16 = 2048;

        let range = PortRange::new(start, end)
            .map_err(|e| Error::invalid_request(e.to_string()))?;
        if range.len() > MAX_SPAN {
            return Err(Error::invalid_request(format!(
                "scan span {} exceeds the {MAX_SPAN}-port limit",
                range.len()
            )));
        }
        Ok(range.iter().map(|port| self.check(port)).collect())
    }

    /// Snapshot of every live allocation.
    #[must_use]
    pub fn list_allocations(&self) -> Vec<Allocation> {
        self.registry.read().list_all()
    }

    /// Runs one reaper sweep synchronously.
    pub fn run_health_sweep(&self, force: bool) -> CleanupReport {
        self.reaper.sweep(self, force)
    }

    /// Registers (or refreshes) a client instance.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` when neither id nor pid is given.
    pub fn register_instance(&self, registration: InstanceRegistration) -> Result<Instance> {
        let instance = self.instances.write().register(registration)?;
        self.save.mark_dirty();
        Ok(instance)
    }

    /// Records a heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` for unknown instances.
    pub fn heartbeat(&self, instance_id: &str) -> Result<chrono::DateTime<Utc>> {
        let at = self.instances.write().heartbeat(instance_id)?;
        self.save.mark_dirty();
        Ok(at)
    }

    /// Registered instances, id order.
    #[must_use]
    pub fn list_instances(&self) -> Vec<Instance> {
        self.instances.read().list()
    }

    /// Records a passive port observation.
    pub fn record_observation(
        &self,
        port: Port,
        instance_id: Option<String>,
        command: Option<String>,
    ) {
        self.observations.write().record(port, instance_id, command);
    }

    /// The observation for one port, if any.
    #[must_use]
    pub fn observation(&self, port: Port) -> Option<Observation> {
        self.observations.read().get(port).cloned()
    }

    /// Every observation, port order.
    #[must_use]
    pub fn observations(&self) -> Vec<Observation> {
        self.observations.read().all()
    }

    /// Aggregate observation stats.
    #[must_use]
    pub fn observation_stats(&self) -> ObservationStats {
        self.observations.read().stats()
    }

    /// Suggests up to `count` likely-free ports for a service type.
    ///
    /// Unknown types fall back to the default `dev` range rather than
    /// returning nothing.
    #[must_use]
    pub fn suggest(&self, service_type: &str, count: usize) -> Suggestions {
        let (service, fallback) = match self.resolve_service(service_type) {
            Some(service) => (Some(service), false),
            None => (self.resolve_service("dev"), true),
        };
        let Some(service) = service else {
            return Suggestions {
                service_type: service_type.to_string(),
                fallback: true,
                ports: Vec::new(),
            };
        };

        let ports = candidate_ports(&service, None)
            .into_iter()
            .filter(|port| {
                self.registry.read().lookup_by_port(*port).is_none()
                    && self.prober.probe(*port)
            })
            .take(count)
            .collect();
        Suggestions {
            service_type: service.name,
            fallback,
            ports,
        }
    }

    /// Daemon health summary for `/status`.
    #[must_use]
    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: self.version.clone(),
            uptime_seconds: self.started.elapsed().as_secs(),
            allocation_count: self.registry.read().len(),
            instance_count: self.instances.read().len(),
            observation_count: self.observations.read().len(),
            service_type_count: self.catalogue.read().len(),
            memory_rss_bytes: resident_memory_bytes(),
            metrics: self.metrics.snapshot(),
            recovery: self.recovery_report.clone(),
        }
    }

    /// The effective catalogue and auto-allocation config for `/config`.
    #[must_use]
    pub fn config_view(&self) -> serde_json::Value {
        let settings = self.settings.read();
        let service_types: Vec<ServiceType> =
            self.catalogue.read().all().cloned().collect();
        json!({
            "service_types": service_types,
            "auto_allocation": settings.auto_allocation,
            "auto_allocation_rules": settings.rules,
            "recovery": settings.recovery,
        })
    }

    /// Removes a service type from the user config.
    ///
    /// # Errors
    ///
    /// Fails with `invalidRequest` while live allocations reference the
    /// type, or when the type is not user-defined.
    pub fn remove_service_type(&self, name: &str) -> Result<()> {
        let live = self.registry.read().list_for_service_type(name).len();
        if live > 0 {
            return Err(Error::ServiceTypeInUse {
                service_type: name.to_string(),
                live,
            });
        }
        self.writer.remove_service_type(name)?;
        self.reload_config()?;
        Ok(())
    }

    /// Re-reads the user config and swaps in the new catalogue and
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns the load error; the previous catalogue stays in place.
    pub fn reload_config(&self) -> Result<Vec<String>> {
        let effective = config::load(&self.paths)?;
        *self.catalogue.write() = effective.catalogue;
        *self.settings.write() = RuntimeSettings::from_user(&effective.user);
        Ok(effective.warnings)
    }

    /// Builds the durable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let registry = self.registry.read();
        Snapshot {
            allocations: registry.list_all(),
            singleton_services: registry.singletons(),
            instances: self.instances.read().list(),
            version: self.version.clone(),
        }
    }

    /// Writes the snapshot synchronously, bypassing the debounce.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn save_snapshot_now(&self) -> Result<()> {
        self.snapshot_store().save(&self.snapshot())
    }

    /// The store pointing at this daemon's snapshot path.
    #[must_use]
    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(self.paths.snapshot_file())
    }

    /// The save signal shared with the background snapshot writer.
    #[must_use]
    pub fn save_signal(&self) -> Arc<SaveSignal> {
        Arc::clone(&self.save)
    }

    /// The config directory layout in use.
    #[must_use]
    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// What startup recovery did.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    /// The singleton ref for a service type, if live.
    #[must_use]
    pub fn singleton_for(&self, service_type: &str) -> Option<SingletonRef> {
        self.registry.read().singleton_for(service_type).cloned()
    }

    /// Counter access for tests and `/status` consumers.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // Catalogue auto-extension for an unknown service type. The whole
    // read-compute-write cycle runs inside the config file lock so that
    // concurrent writers serialize and gap spacing holds under load.
    fn auto_allocate(&self, service_type: &str) -> Result<()> {
        let guard = self.writer.lock()?;

        // Re-read inside the lock: another writer may have won the race.
        let current = self.writer.read_locked(&guard)?;
        if current.service_types.contains_key(service_type) {
            drop(guard);
            self.reload_config()?;
            return Ok(());
        }

        let (auto_config, rules) = {
            let settings = self.settings.read();
            (settings.auto_allocation.clone(), settings.rules.clone())
        };
        let pick = resolve_rule(&rules, service_type, auto_config.default_chunk_size);
        let gap = auto_config.effective_gap();

        // Ranges come from the config just read under the lock, composed
        // over the shipped defaults, so concurrent additions count.
        let effective = config::compose(current.clone())
            .map_err(|err| Error::ConfigWriteFailed {
                reason: format!("user config no longer composes: {err}"),
            })?;
        let ranges = effective.catalogue.ranges();

        let mut slot = compute_range(
            &ranges,
            pick.chunk_size,
            auto_config.placement,
            auto_config.min_port,
            auto_config.max_port,
            gap,
            pick.preferred_start,
        )?;
        if overlaps_any(&ranges, slot.0, slot.1) {
            // One recompute without the start hint, then give up.
            slot = compute_range(
                &ranges,
                pick.chunk_size,
                auto_config.placement,
                auto_config.min_port,
                auto_config.max_port,
                gap,
                None,
            )?;
            if overlaps_any(&ranges, slot.0, slot.1) {
                return Err(Error::NoRangeAvailable {
                    reason: "computed range overlaps a concurrent catalogue change".into(),
                });
            }
        }

        let mut next = current;
        next.service_types.insert(
            service_type.to_string(),
            ServiceTypeConfig {
                preferred: Vec::new(),
                range: PortRange::from_bounds(slot.0, slot.1)?,
                instance_mode: crate::catalogue::InstanceMode::Multi,
                auto_allocated: true,
            },
        );
        self.writer.write_locked(&guard, &next)?;

        self.apply_user_config(next)?;
        self.metrics.record_auto_allocation();
        self.audit_event(
            AuditAction::AutoAllocation,
            json!({
                "service_type": service_type,
                "range": [slot.0, slot.1],
                "placement": auto_config.placement.to_string(),
                "chunk_size": pick.chunk_size,
                "context": {
                    "rule": pick.matched_pattern,
                    "trigger": "unknown service type",
                },
            }),
        );
        tracing::info!(
            service_type,
            range_lo = slot.0,
            range_hi = slot.1,
            chunk = pick.chunk_size,
            "auto-allocated service type range"
        );
        drop(guard);
        Ok(())
    }

    fn apply_user_config(&self, user: UserConfig) -> Result<()> {
        let effective = config::compose(user)?;
        *self.catalogue.write() = effective.catalogue;
        *self.settings.write() = RuntimeSettings::from_user(&effective.user);
        Ok(())
    }

    fn resolve_service(&self, name: &str) -> Option<ServiceType> {
        self.catalogue.read().get(name).cloned()
    }

    // Cross-index invariants hold by construction; a violation means
    // memory corruption or a bug, and serving more traffic from this
    // state would spread it. Persist what we have and stop; startup
    // recovery repairs the snapshot.
    fn enforce_invariants(&self) {
        let verdict = self.registry.read().verify_invariants();
        if let Err(err) = verdict {
            tracing::error!(error = %err, "allocation registry invariant violated; saving state and exiting");
            let _ = self.save_snapshot_now();
            std::process::exit(70);
        }
    }

    pub(crate) fn registry(&self) -> &RwLock<AllocationRegistry> {
        &self.registry
    }

    pub(crate) fn instances(&self) -> &RwLock<InstanceRegistry> {
        &self.instances
    }

    pub(crate) fn prober(&self) -> &dyn PortProber {
        self.prober.as_ref()
    }

    pub(crate) fn health_monitoring_config(&self) -> HealthMonitoringConfig {
        self.settings.read().recovery.health_monitoring.clone()
    }

    pub(crate) fn mark_dirty(&self) {
        self.save.mark_dirty();
    }

    pub(crate) fn audit_event(&self, action: AuditAction, context: serde_json::Value) {
        if let Err(err) = self.audit.append(action, context) {
            tracing::warn!(error = %err, action = action.as_str(), "audit append failed");
        }
    }
}
