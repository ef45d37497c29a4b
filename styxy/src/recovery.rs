//! Startup recovery.
//!
//! Runs once per daemon start, before the HTTP surface opens. Five
//! independent steps validate the persisted snapshot, report on the user
//! config, drop orphaned allocations, repair singleton duplicates, and
//! rebuild the in-memory indexes. A failing step never aborts the ones
//! after it; every step reports success, failure, or auto-repair.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::schema::SystemRecoveryConfig;
use crate::instance::Instance;
use crate::probe::PortProber;
use crate::process::pid_alive;
use crate::registry::{Allocation, AllocationRegistry};
use crate::snapshot::{Snapshot, SnapshotStore};

/// Outcome of one recovery step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step found nothing wrong.
    Success,
    /// The step could not complete; state is unchanged.
    Failed,
    /// The step found a problem and repaired it.
    AutoRepaired,
}

/// Report for one recovery step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name, stable across releases.
    pub name: String,
    /// What happened.
    pub status: StepStatus,
    /// Human-readable detail.
    #[serde(default)]
    pub detail: Option<String>,
}

/// Aggregate recovery report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Per-step outcomes, in execution order.
    pub steps: Vec<StepReport>,
    /// Warnings worth surfacing to the operator.
    pub warnings: Vec<String>,
}

impl RecoveryReport {
    fn push(&mut self, name: &str, status: StepStatus, detail: Option<String>) {
        self.steps.push(StepReport {
            name: name.to_string(),
            status,
            detail,
        });
    }

    /// Names of steps that succeeded or auto-repaired.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status != StepStatus::Failed)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Names of steps that failed.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Looks up one step's report by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Context payload for the `SYSTEM_RECOVERY_COMPLETE` audit event.
    #[must_use]
    pub fn audit_context(&self) -> serde_json::Value {
        json!({
            "success": self.succeeded(),
            "failed": self.failed(),
            "warnings": self.warnings,
            "steps": self.steps,
        })
    }
}

/// Everything recovery hands back to the daemon.
#[derive(Debug)]
pub struct RecoveryOutcome {
    /// The rebuilt registry.
    pub registry: AllocationRegistry,
    /// Instances restored from the snapshot.
    pub instances: Vec<Instance>,
    /// What happened, step by step.
    pub report: RecoveryReport,
}

/// Runs the recovery pipeline.
///
/// `config_status` reports whether the user config parsed (recovery never
/// repairs the config, it only reports). `is_single` answers instance-mode
/// questions from whatever catalogue survived config loading.
pub fn run(
    store: &SnapshotStore,
    config_status: &std::result::Result<(), String>,
    recovery: &SystemRecoveryConfig,
    prober: &dyn PortProber,
    is_single: &dyn Fn(&str) -> bool,
) -> RecoveryOutcome {
    let mut report = RecoveryReport::default();

    // Step 1: snapshot validation.
    let snapshot = load_snapshot(store, recovery, &mut report);

    // Step 2: user config validation (report only).
    match config_status {
        Ok(()) => report.push("config_validation", StepStatus::Success, None),
        Err(message) => {
            report.warnings.push(format!(
                "user config invalid, continuing with previous catalogue: {message}"
            ));
            report.push(
                "config_validation",
                StepStatus::Failed,
                Some(message.clone()),
            );
        }
    }

    // Step 3: orphan cleanup.
    let allocations = clean_orphans(snapshot.allocations, prober, &mut report);

    // Step 4: singleton integrity.
    let allocations = repair_singletons(allocations, is_single, &mut report);

    // Step 5: index rebuild.
    let expected = allocations.len();
    let registry = AllocationRegistry::rebuild(allocations, is_single);
    if registry.len() == expected {
        match registry.verify_invariants() {
            Ok(()) => report.push(
                "index_rebuild",
                StepStatus::Success,
                Some(format!("{expected} allocations indexed")),
            ),
            Err(err) => report.push("index_rebuild", StepStatus::Failed, Some(err.to_string())),
        }
    } else {
        report.warnings.push(format!(
            "index rebuild dropped {} conflicting allocation(s)",
            expected - registry.len()
        ));
        report.push(
            "index_rebuild",
            StepStatus::AutoRepaired,
            Some(format!("{} of {expected} allocations indexed", registry.len())),
        );
    }

    RecoveryOutcome {
        registry,
        instances: snapshot.instances,
        report,
    }
}

fn load_snapshot(
    store: &SnapshotStore,
    recovery: &SystemRecoveryConfig,
    report: &mut RecoveryReport,
) -> Snapshot {
    match store.read() {
        Ok(Some(snapshot)) => {
            report.push(
                "state_validation",
                StepStatus::Success,
                Some(format!("{} allocations loaded", snapshot.allocations.len())),
            );
            snapshot
        }
        Ok(None) => {
            report.push(
                "state_validation",
                StepStatus::Success,
                Some("no snapshot on disk; starting empty".into()),
            );
            Snapshot::default()
        }
        Err(err) => {
            report
                .warnings
                .push(format!("snapshot unreadable, starting empty: {err}"));
            if recovery.backup_corrupted_state {
                match store.backup_corrupt() {
                    Ok(backup) => report.push(
                        "state_validation",
                        StepStatus::AutoRepaired,
                        Some(format!("corrupt snapshot moved to {}", backup.display())),
                    ),
                    Err(backup_err) => report.push(
                        "state_validation",
                        StepStatus::Failed,
                        Some(format!("could not back up corrupt snapshot: {backup_err}")),
                    ),
                }
            } else {
                report.push(
                    "state_validation",
                    StepStatus::AutoRepaired,
                    Some("corrupt snapshot discarded".into()),
                );
            }
            Snapshot::default()
        }
    }
}

fn clean_orphans(
    allocations: Vec<Allocation>,
    prober: &dyn PortProber,
    report: &mut RecoveryReport,
) -> Vec<Allocation> {
    let before = allocations.len();
    let mut released = Vec::new();

    let kept: Vec<Allocation> = allocations
        .into_iter()
        .filter(|allocation| {
            let alive = allocation.process_id.is_some_and(pid_alive);
            if !alive {
                released.push((allocation.port.value(), "owner process gone"));
                return false;
            }
            // The owner exists; if nothing listens on the port, the
            // reservation is stale anyway.
            if prober.probe(allocation.port) {
                released.push((allocation.port.value(), "port no longer bound"));
                return false;
            }
            true
        })
        .collect();

    for (port, reason) in &released {
        tracing::info!(port, reason, "startup recovery released orphaned allocation");
    }

    if released.is_empty() {
        report.push(
            "orphan_cleanup",
            StepStatus::Success,
            Some(format!("{before} allocation(s) verified")),
        );
    } else {
        report.push(
            "orphan_cleanup",
            StepStatus::AutoRepaired,
            Some(format!("released {} of {before} allocation(s)", released.len())),
        );
    }
    kept
}

fn repair_singletons(
    allocations: Vec<Allocation>,
    is_single: &dyn Fn(&str) -> bool,
    report: &mut RecoveryReport,
) -> Vec<Allocation> {
    use std::collections::HashMap;

    // Latest allocation wins per single-mode type.
    let mut winners: HashMap<String, &Allocation> = HashMap::new();
    for allocation in allocations.iter().filter(|a| is_single(&a.service_type)) {
        winners
            .entry(allocation.service_type.clone())
            .and_modify(|current| {
                if allocation.allocated_at > current.allocated_at {
                    *current = allocation;
                }
            })
            .or_insert(allocation);
    }

    let winner_locks: std::collections::HashSet<_> =
        winners.values().map(|a| a.lock_id).collect();

    let before = allocations.len();
    let kept: Vec<Allocation> = allocations
        .into_iter()
        .filter(|a| !is_single(&a.service_type) || winner_locks.contains(&a.lock_id))
        .collect();

    let dropped = before - kept.len();
    if dropped == 0 {
        report.push("singleton_integrity", StepStatus::Success, None);
    } else {
        report.push(
            "singleton_integrity",
            StepStatus::AutoRepaired,
            Some(format!("released {dropped} duplicate singleton allocation(s)")),
        );
    }
    kept
}
