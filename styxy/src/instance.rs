//! Client instance registry.
//!
//! Instances are the sessions (editors, test runners, interception hooks)
//! that hold allocations and heartbeat the daemon. Hook-level clients may
//! register without choosing an id; given a pid, the daemon synthesizes
//! one. Client-chosen ids are opaque and passed through untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A registered client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Opaque session identifier.
    pub instance_id: String,
    /// The session's working directory, if reported.
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Arbitrary client-supplied metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When the instance first registered.
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat time; drives expiry.
    pub last_heartbeat_at: DateTime<Utc>,
}

/// Inputs to an instance registration.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistration {
    /// Client-chosen id; synthesized from `pid` when absent.
    pub instance_id: Option<String>,
    /// The client's pid, used for id synthesis.
    pub pid: Option<i32>,
    /// Working directory to record.
    pub working_directory: Option<String>,
    /// Metadata to record.
    pub metadata: Option<serde_json::Value>,
}

/// In-memory instance table, keyed by instance id.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    by_id: BTreeMap<String, Instance>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a registry from a snapshot's instance list.
    #[must_use]
    pub fn from_instances(instances: Vec<Instance>) -> Self {
        Self {
            by_id: instances
                .into_iter()
                .map(|i| (i.instance_id.clone(), i))
                .collect(),
        }
    }

    /// Registers an instance, or refreshes it if the id is already known.
    ///
    /// Without an explicit id, a pid yields the synthetic id
    /// `ldpreload-<pid>`; with neither, registration is rejected.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` when no id can be determined.
    pub fn register(&mut self, registration: InstanceRegistration) -> Result<Instance> {
        let instance_id = match registration.instance_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => match registration.pid {
                Some(pid) => format!("ldpreload-{pid}"),
                None => {
                    return Err(Error::invalid_request(
                        "instance registration needs an instance_id or a pid",
                    ))
                }
            },
        };

        let now = Utc::now();
        let instance = self
            .by_id
            .entry(instance_id.clone())
            .and_modify(|existing| {
                existing.last_heartbeat_at = now;
                if registration.working_directory.is_some() {
                    existing
                        .working_directory
                        .clone_from(&registration.working_directory);
                }
                if let Some(ref metadata) = registration.metadata {
                    existing.metadata = metadata.clone();
                }
            })
            .or_insert_with(|| Instance {
                instance_id,
                working_directory: registration.working_directory.clone(),
                metadata: registration
                    .metadata
                    .clone()
                    .unwrap_or(serde_json::Value::Null),
                registered_at: now,
                last_heartbeat_at: now,
            });
        Ok(instance.clone())
    }

    /// Records a heartbeat for an instance.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` when the instance is unknown.
    pub fn heartbeat(&mut self, instance_id: &str) -> Result<DateTime<Utc>> {
        match self.by_id.get_mut(instance_id) {
            Some(instance) => {
                instance.last_heartbeat_at = Utc::now();
                Ok(instance.last_heartbeat_at)
            }
            None => Err(Error::invalid_request(format!(
                "unknown instance '{instance_id}'"
            ))),
        }
    }

    /// Removes instances whose heartbeat is older than `ttl`, returning
    /// the expired records.
    pub fn expire_stale(&mut self, ttl: Duration, now: DateTime<Utc>) -> Vec<Instance> {
        let cutoff = now - ttl;
        let stale: Vec<String> = self
            .by_id
            .values()
            .filter(|i| i.last_heartbeat_at < cutoff)
            .map(|i| i.instance_id.clone())
            .collect();
        stale
            .iter()
            .filter_map(|id| self.by_id.remove(id))
            .collect()
    }

    /// Looks up an instance by id.
    #[must_use]
    pub fn get(&self, instance_id: &str) -> Option<&Instance> {
        self.by_id.get(instance_id)
    }

    /// Returns every instance in id order.
    #[must_use]
    pub fn list(&self) -> Vec<Instance> {
        self.by_id.values().cloned().collect()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if no instances are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
