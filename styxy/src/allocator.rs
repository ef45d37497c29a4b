//! Allocation request shaping and candidate enumeration.
//!
//! The allocator's outer loop lives on [`crate::daemon::Daemon`], which
//! owns the locks; this module holds the request/outcome types and the
//! pure candidate-list construction they share.

use serde::{Deserialize, Serialize};

use crate::catalogue::ServiceType;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::registry::LockId;

/// Inputs to a single-port allocation.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    /// Catalogue entry to allocate from.
    pub service_type: String,
    /// Free-form tag recorded on the allocation.
    pub service_name: Option<String>,
    /// The requesting session.
    pub instance_id: String,
    /// Tried once at the head of the candidate list; may lie outside the
    /// type's range.
    pub preferred_port: Option<Port>,
    /// Project directory recorded on the allocation.
    pub project_path: Option<String>,
    /// Owning OS process, if the caller knows it.
    pub process_id: Option<i32>,
    /// Report the candidate without reserving anything.
    pub dry_run: bool,
}

impl AllocationRequest {
    /// Creates a request with only the required fields set.
    #[must_use]
    pub fn new(service_type: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            service_name: None,
            instance_id: instance_id.into(),
            preferred_port: None,
            project_path: None,
            process_id: None,
            dry_run: false,
        }
    }

    /// Sets the preferred port.
    #[must_use]
    pub const fn with_preferred_port(mut self, port: Option<Port>) -> Self {
        self.preferred_port = port;
        self
    }

    /// Sets the service name tag.
    #[must_use]
    pub fn with_service_name(mut self, name: Option<String>) -> Self {
        self.service_name = name;
        self
    }

    /// Sets the project path.
    #[must_use]
    pub fn with_project_path(mut self, path: Option<String>) -> Self {
        self.project_path = path;
        self
    }

    /// Sets the owning process id.
    #[must_use]
    pub const fn with_process_id(mut self, pid: Option<i32>) -> Self {
        self.process_id = pid;
        self
    }

    /// Sets the dry-run flag.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Validates request fields that serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` when a required field is empty.
    pub fn validate(&self) -> Result<()> {
        if self.service_type.trim().is_empty() {
            return Err(Error::invalid_request("service_type must be non-empty"));
        }
        if self.instance_id.trim().is_empty() {
            return Err(Error::invalid_request("instance_id must be non-empty"));
        }
        Ok(())
    }
}

/// Result of a successful allocation (or dry run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    /// The port handed to the caller.
    pub port: Port,
    /// The lock id owning the reservation; absent on dry runs.
    pub lock_id: Option<LockId>,
    /// True when an existing singleton allocation was returned instead of
    /// a new one.
    pub existing: bool,
    /// True when the service type was created by auto-allocation during
    /// this call.
    pub auto_allocated: bool,
}

/// Builds the ordered candidate list for a service type.
///
/// Order: the explicit preferred port (if any), then the catalogue's
/// preferred ports in order, then the range ascending. Duplicates keep
/// their first occurrence. An explicit preferred port outside the range is
/// still tried, exactly once, at the head.
///
/// # Examples
///
/// ```
/// use styxy::allocator::candidate_ports;
/// use styxy::catalogue::Catalogue;
///
/// let catalogue = Catalogue::shipped();
/// let dev = catalogue.get("dev").unwrap();
/// let candidates = candidate_ports(dev, None);
/// assert_eq!(candidates[0].value(), 3000);
/// assert_eq!(candidates.len(), 100);
/// ```
#[must_use]
pub fn candidate_ports(service: &ServiceType, preferred: Option<Port>) -> Vec<Port> {
    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::with_capacity(
        usize::from(service.range.len()) + service.preferred.len() + 1,
    );

    let head = preferred.into_iter();
    let body = service.preferred.iter().copied();
    let tail = service.range.iter();

    for port in head.chain(body).chain(tail) {
        if seen.insert(port) {
            candidates.push(port);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{InstanceMode, ServiceType};
    use crate::port::PortRange;

    fn service(preferred: &[u16], lo: u16, hi: u16) -> ServiceType {
        ServiceType {
            name: "dev".into(),
            preferred: preferred
                .iter()
                .map(|p| Port::try_from(*p).unwrap())
                .collect(),
            range: PortRange::from_bounds(lo, hi).unwrap(),
            instance_mode: InstanceMode::Multi,
            auto_allocated: false,
        }
    }

    fn values(candidates: &[Port]) -> Vec<u16> {
        candidates.iter().map(|p| p.value()).collect()
    }

    #[test]
    fn test_candidates_preferred_then_range() {
        let svc = service(&[3000, 3001], 3000, 3004);
        let candidates = candidate_ports(&svc, None);
        assert_eq!(values(&candidates), vec![3000, 3001, 3002, 3003, 3004]);
    }

    #[test]
    fn test_explicit_preferred_leads() {
        let svc = service(&[3000, 3001], 3000, 3004);
        let explicit = Port::try_from(3003).unwrap();
        let candidates = candidate_ports(&svc, Some(explicit));
        assert_eq!(values(&candidates), vec![3003, 3000, 3001, 3002, 3004]);
    }

    #[test]
    fn test_out_of_range_preferred_appears_once_at_head() {
        let svc = service(&[3000], 3000, 3002);
        let explicit = Port::try_from(9999).unwrap();
        let candidates = candidate_ports(&svc, Some(explicit));
        assert_eq!(values(&candidates), vec![9999, 3000, 3001, 3002]);
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        // Preferred list repeats itself and overlaps the range.
        let svc = service(&[3002, 3002, 3000], 3000, 3003);
        let candidates = candidate_ports(&svc, Some(Port::try_from(3002).unwrap()));
        assert_eq!(values(&candidates), vec![3002, 3000, 3001, 3003]);
    }

    #[test]
    fn test_preferred_outside_range_from_catalogue() {
        // Catalogue-level preferred ports outside the range are still
        // tried before the range scan.
        let svc = service(&[8080], 3000, 3001);
        let candidates = candidate_ports(&svc, None);
        assert_eq!(values(&candidates), vec![8080, 3000, 3001]);
    }

    #[test]
    fn test_request_validation() {
        assert!(AllocationRequest::new("dev", "i1").validate().is_ok());
        assert!(AllocationRequest::new("", "i1").validate().is_err());
        assert!(AllocationRequest::new("dev", " ").validate().is_err());
    }

    #[test]
    fn test_request_builder_chain() {
        let request = AllocationRequest::new("dev", "i1")
            .with_preferred_port(Some(Port::try_from(3005).unwrap()))
            .with_service_name(Some("web".into()))
            .with_process_id(Some(4242))
            .with_dry_run(true);
        assert_eq!(request.preferred_port.unwrap().value(), 3005);
        assert_eq!(request.service_name.as_deref(), Some("web"));
        assert_eq!(request.process_id, Some(4242));
        assert!(request.dry_run);
    }
}
