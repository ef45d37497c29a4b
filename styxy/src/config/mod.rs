//! Configuration system.
//!
//! Three concerns live here:
//!
//! - [`schema`]: the JSON shape of the user config and its runtime knobs.
//! - [`loader`]: composing shipped defaults with the user overlay.
//! - [`writer`]: serialized, atomic, backed-up mutation of the user
//!   config under an advisory file lock.
//!
//! The config directory layout itself is described by [`paths`].

pub mod loader;
pub mod paths;
pub mod schema;
pub mod writer;

pub use loader::{compose, load, EffectiveConfig};
pub use paths::{ConfigPaths, CONFIG_DIR_ENV};
pub use schema::{
    AutoAllocationConfig, AutoAllocationRule, HealthMonitoringConfig, Placement,
    PortConflictConfig, RecoveryConfig, ServiceTypeConfig, SystemRecoveryConfig, UserConfig,
};
pub use writer::{ConfigLockGuard, ConfigWriter};
