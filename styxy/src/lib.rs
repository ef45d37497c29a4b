#![deny(missing_docs, unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # styxy
//!
//! Core library for single-node development port coordination.
//!
//! styxy arbitrates TCP port assignments among cooperating development
//! tools on one machine: it prevents collisions, enforces per-service-type
//! range conventions, supports single-instance service types, extends its
//! own catalogue when unknown types appear, and repairs its persisted
//! state after crashes.
//!
//! ## Core Types
//!
//! - [`Port`] and [`PortRange`]: validated network port types
//! - [`Daemon`]: the process-wide state container behind the HTTP surface
//! - [`Allocation`] and [`LockId`]: port reservation tracking
//! - [`Catalogue`]: the service-type table
//! - [`Error`] and [`Result`]: error handling types
//!
//! ## Examples
//!
//! ```
//! use styxy::{Port, PortRange};
//!
//! let port = Port::try_from(3000).unwrap();
//! assert_eq!(port.value(), 3000);
//!
//! let range = PortRange::from_bounds(3000, 3099).unwrap();
//! assert!(range.contains(port));
//! ```

pub mod allocator;
pub mod audit;
pub mod autoalloc;
pub mod catalogue;
pub mod config;
pub mod daemon;
pub mod error;
pub mod instance;
pub mod metrics;
pub mod observe;
pub mod port;
pub mod probe;
pub mod process;
pub mod reaper;
pub mod recovery;
pub mod registry;
pub mod snapshot;

// Re-export key types at crate root for convenience
pub use allocator::{AllocationOutcome, AllocationRequest};
pub use catalogue::{Catalogue, InstanceMode, ServiceType};
pub use config::{ConfigPaths, ConfigWriter, UserConfig};
pub use daemon::{Daemon, DaemonOptions, PortCheck, Suggestions};
pub use error::{Error, Result};
pub use instance::{Instance, InstanceRegistration};
pub use port::{Port, PortRange};
pub use probe::{MockProber, PortProber, SystemProber};
pub use reaper::{spawn_reaper, CleanupReport, ReaperHandle};
pub use recovery::{RecoveryReport, StepStatus};
pub use registry::{Allocation, AllocationRegistry, LockId, SingletonRef};
pub use snapshot::{spawn_writer, SaveSignal, Snapshot, SnapshotStore, SnapshotWriterHandle};
