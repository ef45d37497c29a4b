//! The allocation registry.
//!
//! The registry is the authoritative `port -> Allocation` map, with a
//! `lock id -> port` index and a `service type -> SingletonRef` map kept
//! consistent on every mutation. [`AllocationRegistry::reserve`] is the
//! linearization point for allocation ordering: callers probe and build
//! candidates without any lock, then attempt the reservation under the
//! registry's single write lock, where port occupancy and singleton
//! existence are re-checked atomically.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalogue::InstanceMode;
use crate::error::{Error, Result};
use crate::port::Port;

/// Opaque 128-bit identifier for one allocation lifetime.
///
/// Returned by allocate and required for release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(Uuid);

impl LockId {
    /// Generates a fresh, globally unique lock id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LockId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::invalid_request(format!("malformed lock id '{s}'")))
    }
}

/// A live binding from a port to its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// The allocated port; primary key.
    pub port: Port,
    /// Opaque id required for release; secondary key.
    pub lock_id: LockId,
    /// The catalogue entry this allocation belongs to.
    pub service_type: String,
    /// Free-form tag supplied by the caller.
    #[serde(default)]
    pub service_name: Option<String>,
    /// The requesting session.
    pub instance_id: String,
    /// Project directory associated with the allocation, if any.
    #[serde(default)]
    pub project_path: Option<String>,
    /// Owning OS process, if known.
    #[serde(default)]
    pub process_id: Option<i32>,
    /// When the reservation was written.
    pub allocated_at: DateTime<Utc>,
}

/// The singleton record for a `single`-mode service type.
///
/// Exists iff exactly one allocation is live for the type; it mirrors that
/// allocation's identity by primitive keys rather than by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingletonRef {
    /// Port held by the singleton allocation.
    pub port: Port,
    /// Lock id of the singleton allocation.
    pub lock_id: LockId,
    /// The session that created it.
    pub instance_id: String,
    /// Owning OS process, if known.
    #[serde(default)]
    pub process_id: Option<i32>,
    /// When the singleton allocation was written.
    pub allocated_at: DateTime<Utc>,
}

impl SingletonRef {
    fn of(allocation: &Allocation) -> Self {
        Self {
            port: allocation.port,
            lock_id: allocation.lock_id,
            instance_id: allocation.instance_id.clone(),
            process_id: allocation.process_id,
            allocated_at: allocation.allocated_at,
        }
    }
}

/// Outcome of an atomic reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// The allocation was written.
    Reserved,
    /// Another allocation already holds this port; try the next
    /// candidate.
    PortTaken,
    /// The service type is single-mode and already has a live
    /// allocation; the existing one is returned instead.
    SingletonExists(Allocation),
}

/// The authoritative in-memory allocation state.
///
/// All lookups are O(log n) or better. The registry itself is not
/// synchronized; the daemon wraps it in a single reader-writer lock and
/// funnels every mutation through the write side.
#[derive(Debug, Default)]
pub struct AllocationRegistry {
    by_port: BTreeMap<u16, Allocation>,
    by_lock: HashMap<LockId, u16>,
    singletons: BTreeMap<String, SingletonRef>,
}

impl AllocationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from a canonical allocation list.
    ///
    /// Used by startup recovery after the orphan and singleton sweeps.
    /// Duplicate ports keep the first occurrence; `is_single` decides
    /// which service types get singleton refs.
    pub fn rebuild(
        allocations: Vec<Allocation>,
        is_single: impl Fn(&str) -> bool,
    ) -> Self {
        let mut registry = Self::new();
        for allocation in allocations {
            let mode = if is_single(&allocation.service_type) {
                InstanceMode::Single
            } else {
                InstanceMode::Multi
            };
            // Rebuild is best-effort; conflicts were resolved upstream.
            let _ = registry.reserve(allocation, mode);
        }
        registry
    }

    /// Atomically reserves a port.
    ///
    /// This is the linearization point: of two concurrent callers
    /// targeting the same port, exactly one sees [`ReserveOutcome::Reserved`]
    /// and the other [`ReserveOutcome::PortTaken`]. For single-mode types
    /// the existing allocation wins over any new attempt.
    pub fn reserve(&mut self, allocation: Allocation, mode: InstanceMode) -> ReserveOutcome {
        if mode == InstanceMode::Single {
            if let Some(existing) = self.singletons.get(&allocation.service_type) {
                if let Some(live) = self.by_port.get(&existing.port.value()) {
                    return ReserveOutcome::SingletonExists(live.clone());
                }
            }
        }

        if self.by_port.contains_key(&allocation.port.value()) {
            return ReserveOutcome::PortTaken;
        }

        self.by_lock
            .insert(allocation.lock_id, allocation.port.value());
        if mode == InstanceMode::Single {
            self.singletons
                .insert(allocation.service_type.clone(), SingletonRef::of(&allocation));
        }
        self.by_port.insert(allocation.port.value(), allocation);
        ReserveOutcome::Reserved
    }

    /// Releases the allocation owned by `lock_id`.
    ///
    /// Returns the released allocation, or `None` if the lock id is
    /// unknown (release is idempotent at the caller's level).
    pub fn release(&mut self, lock_id: &LockId) -> Option<Allocation> {
        let port = self.by_lock.remove(lock_id)?;
        let allocation = self.by_port.remove(&port)?;

        // Only drop the singleton ref if it points at this allocation.
        if let Some(singleton) = self.singletons.get(&allocation.service_type) {
            if singleton.lock_id == allocation.lock_id {
                self.singletons.remove(&allocation.service_type);
            }
        }
        Some(allocation)
    }

    /// Looks up the allocation holding a port.
    #[must_use]
    pub fn lookup_by_port(&self, port: Port) -> Option<&Allocation> {
        self.by_port.get(&port.value())
    }

    /// Looks up an allocation by its lock id.
    #[must_use]
    pub fn lookup_by_lock(&self, lock_id: &LockId) -> Option<&Allocation> {
        self.by_lock
            .get(lock_id)
            .and_then(|port| self.by_port.get(port))
    }

    /// Returns the live allocations for one service type, port order.
    #[must_use]
    pub fn list_for_service_type(&self, service_type: &str) -> Vec<&Allocation> {
        self.by_port
            .values()
            .filter(|a| a.service_type == service_type)
            .collect()
    }

    /// Returns a snapshot of every live allocation, port order.
    #[must_use]
    pub fn list_all(&self) -> Vec<Allocation> {
        self.by_port.values().cloned().collect()
    }

    /// Returns the singleton ref for a service type, if one is live.
    #[must_use]
    pub fn singleton_for(&self, service_type: &str) -> Option<&SingletonRef> {
        self.singletons.get(service_type)
    }

    /// Returns a snapshot of the singleton map.
    #[must_use]
    pub fn singletons(&self) -> BTreeMap<String, SingletonRef> {
        self.singletons.clone()
    }

    /// Number of live allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    /// Returns `true` if no allocations are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }

    /// Checks the cross-index invariants.
    ///
    /// A failure here is not recoverable in-process; the daemon saves a
    /// snapshot and exits so startup recovery can repair the state.
    ///
    /// # Errors
    ///
    /// Returns `internal` describing the first violated invariant.
    pub fn verify_invariants(&self) -> Result<()> {
        if self.by_lock.len() != self.by_port.len() {
            return Err(Error::internal(format!(
                "lock index has {} entries but port map has {}",
                self.by_lock.len(),
                self.by_port.len()
            )));
        }

        for (lock_id, port) in &self.by_lock {
            match self.by_port.get(port) {
                Some(allocation) if allocation.lock_id == *lock_id => {}
                Some(_) => {
                    return Err(Error::internal(format!(
                        "lock index entry for port {port} names a different lock id"
                    )));
                }
                None => {
                    return Err(Error::internal(format!(
                        "lock index references port {port} with no allocation"
                    )));
                }
            }
        }

        for (service_type, singleton) in &self.singletons {
            let live = self.list_for_service_type(service_type);
            if live.len() != 1 {
                return Err(Error::internal(format!(
                    "singleton service type '{service_type}' has {} live allocations",
                    live.len()
                )));
            }
            if live[0].port != singleton.port || live[0].lock_id != singleton.lock_id {
                return Err(Error::internal(format!(
                    "singleton ref for '{service_type}' disagrees with its allocation"
                )));
            }
        }
        Ok(())
    }
}
