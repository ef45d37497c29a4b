//! Passive port observations.
//!
//! The interception layer (and the daemon's own check/scan paths) report
//! ports seen in use without going through allocation. Observations are
//! advisory: they feed `/observe/*`, the observation stats, and the
//! suggestion endpoint, and never block an allocation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::port::Port;

/// One observed port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// The observed port.
    pub port: Port,
    /// The session that reported it, when known.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// The command line associated with the listener, when known.
    #[serde(default)]
    pub command: Option<String>,
    /// First time the port was seen.
    pub first_seen: DateTime<Utc>,
    /// Most recent sighting.
    pub last_seen: DateTime<Utc>,
    /// How many times the port has been reported.
    pub count: u64,
}

/// Aggregate view over all observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationStats {
    /// Number of distinct observed ports.
    pub distinct_ports: usize,
    /// Sum of per-port sighting counts.
    pub total_observations: u64,
    /// Most recent sighting across all ports.
    #[serde(default)]
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// In-memory observation table, keyed by port.
#[derive(Debug, Default)]
pub struct ObservationStore {
    by_port: BTreeMap<u16, Observation>,
}

impl ObservationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sighting of `port`.
    ///
    /// Repeat sightings bump the count and refresh `last_seen`; fresher
    /// attribution (instance, command) replaces older attribution.
    pub fn record(
        &mut self,
        port: Port,
        instance_id: Option<String>,
        command: Option<String>,
    ) {
        use std::collections::btree_map::Entry;

        let now = Utc::now();
        match self.by_port.entry(port.value()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.last_seen = now;
                existing.count += 1;
                if instance_id.is_some() {
                    existing.instance_id = instance_id;
                }
                if command.is_some() {
                    existing.command = command;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Observation {
                    port,
                    instance_id,
                    command,
                    first_seen: now,
                    last_seen: now,
                    count: 1,
                });
            }
        }
    }

    /// Looks up the observation for a port.
    #[must_use]
    pub fn get(&self, port: Port) -> Option<&Observation> {
        self.by_port.get(&port.value())
    }

    /// Returns every observation in port order.
    #[must_use]
    pub fn all(&self) -> Vec<Observation> {
        self.by_port.values().cloned().collect()
    }

    /// Computes aggregate stats.
    #[must_use]
    pub fn stats(&self) -> ObservationStats {
        ObservationStats {
            distinct_ports: self.by_port.len(),
            total_observations: self.by_port.values().map(|o| o.count).sum(),
            last_observed_at: self.by_port.values().map(|o| o.last_seen).max(),
        }
    }

    /// Number of distinct observed ports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    /// Returns `true` if nothing has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }
}
