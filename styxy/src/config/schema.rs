//! User configuration schema.
//!
//! The user config is a single JSON object stored in the styxy config
//! directory. Top-level keys: `service_types`, `auto_allocation`,
//! `auto_allocation_rules`, `recovery`. Every section is optional; missing
//! sections take the compiled-in defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalogue::InstanceMode;
use crate::error::{Error, Result};
use crate::port::{Port, PortRange};

/// Complete user configuration.
///
/// # Examples
///
/// ```
/// use styxy::config::UserConfig;
///
/// let config: UserConfig = serde_json::from_str(r#"{
///     "service_types": {
///         "grafana": { "range": [11510, 11519], "auto_allocated": true }
///     }
/// }"#).unwrap();
/// assert!(config.service_types.contains_key("grafana"));
/// assert!(config.auto_allocation.enabled);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
    /// Service types added or overridden by the user.
    pub service_types: BTreeMap<String, ServiceTypeConfig>,

    /// Auto-allocation behaviour.
    pub auto_allocation: AutoAllocationConfig,

    /// Per-pattern overrides applied by the auto-allocator, first match
    /// wins.
    pub auto_allocation_rules: Vec<AutoAllocationRule>,

    /// Conflict retry, health monitoring, and startup recovery policies.
    pub recovery: RecoveryConfig,
}

impl UserConfig {
    /// Loads the user config from `path`.
    ///
    /// A missing file is not an error and yields `None`; the caller falls
    /// back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Loads the user config, substituting defaults when the file is
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// Structural validation beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` if a knob is out of its legal domain.
    pub fn validate(&self) -> Result<()> {
        self.auto_allocation.validate()?;
        for rule in &self.auto_allocation_rules {
            rule.validate()?;
        }
        self.recovery.validate()?;
        Ok(())
    }
}

/// One service type row as stored in the user config.
///
/// The range is the only required field; everything else defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceTypeConfig {
    /// Ports tried first, in order, regardless of the range.
    #[serde(default)]
    pub preferred: Vec<Port>,

    /// The `[lo, hi]` port range owned by this type.
    pub range: PortRange,

    /// Whether the type allows one live allocation or many.
    #[serde(default)]
    pub instance_mode: InstanceMode,

    /// True when the entry was created by the auto-allocator.
    #[serde(default)]
    pub auto_allocated: bool,
}

/// Placement strategy for new auto-allocated ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Append after the highest existing range.
    #[default]
    After,
    /// Prepend before the lowest existing range.
    Before,
    /// First gap between existing ranges large enough to hold the chunk
    /// with padding on both sides; falls back to `After`.
    Smart,
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::After => write!(f, "after"),
            Self::Before => write!(f, "before"),
            Self::Smart => write!(f, "smart"),
        }
    }
}

/// Process-wide auto-allocation knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoAllocationConfig {
    /// Master switch; when off, unknown service types fail immediately.
    pub enabled: bool,
    /// Range width used when no rule overrides it.
    pub default_chunk_size: u16,
    /// Where new ranges are placed relative to existing ones.
    pub placement: Placement,
    /// Lowest port the auto-allocator may hand out.
    pub min_port: u16,
    /// Highest port the auto-allocator may hand out.
    pub max_port: u16,
    /// Keep `gap_size` unused ports between neighbouring ranges.
    pub preserve_gaps: bool,
    /// Padding between an auto-allocated range and its neighbours.
    pub gap_size: u16,
}

impl Default for AutoAllocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_chunk_size: 10,
            placement: Placement::After,
            min_port: 1024,
            max_port: 65000,
            preserve_gaps: true,
            gap_size: 10,
        }
    }
}

impl AutoAllocationConfig {
    /// Effective gap applied around new ranges.
    #[must_use]
    pub const fn effective_gap(&self) -> u16 {
        if self.preserve_gaps {
            self.gap_size
        } else {
            0
        }
    }

    fn validate(&self) -> Result<()> {
        if self.default_chunk_size == 0 {
            return Err(Error::invalid_request(
                "auto_allocation.default_chunk_size must be positive",
            ));
        }
        if self.min_port == 0 || self.min_port > self.max_port {
            return Err(Error::invalid_request(format!(
                "auto_allocation port window [{}, {}] is malformed",
                self.min_port, self.max_port
            )));
        }
        Ok(())
    }
}

/// A glob-matched override for auto-allocation of specific service names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoAllocationRule {
    /// Glob-style pattern matched against the service-type name.
    pub pattern: String,
    /// Chunk size override.
    pub chunk_size: Option<u16>,
    /// Preferred starting port for the new range; used when the slot is
    /// free, otherwise placement proceeds normally.
    pub preferred_range_start: Option<u16>,
}

impl AutoAllocationRule {
    fn validate(&self) -> Result<()> {
        if self.pattern.is_empty() {
            return Err(Error::invalid_request(
                "auto_allocation_rules entries need a pattern",
            ));
        }
        if self.chunk_size == Some(0) {
            return Err(Error::invalid_request(format!(
                "auto_allocation rule '{}' has a zero chunk_size",
                self.pattern
            )));
        }
        Ok(())
    }
}

/// Conflict retry, health monitoring, and startup recovery policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Allocation-time conflict handling.
    pub port_conflict: PortConflictConfig,
    /// Background health reaper settings.
    pub health_monitoring: HealthMonitoringConfig,
    /// Startup recovery settings.
    pub system_recovery: SystemRecoveryConfig,
}

impl RecoveryConfig {
    fn validate(&self) -> Result<()> {
        if self.health_monitoring.check_interval_ms == 0 {
            return Err(Error::invalid_request(
                "recovery.health_monitoring.check_interval_ms must be positive",
            ));
        }
        if self.health_monitoring.max_failures == 0 {
            return Err(Error::invalid_request(
                "recovery.health_monitoring.max_failures must be positive",
            ));
        }
        Ok(())
    }
}

/// Allocation-time conflict handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortConflictConfig {
    /// Master switch for conflict handling.
    pub enabled: bool,
    /// Probe candidates before reserving them.
    pub check_availability: bool,
    /// Gross retries surfaced to external callers.
    pub max_retries: u32,
    /// Initial backoff between gross retries.
    pub backoff_ms: u64,
    /// Multiplier applied to the backoff after each retry.
    pub backoff_multiplier: f64,
}

impl Default for PortConflictConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_availability: true,
            max_retries: 3,
            backoff_ms: 100,
            backoff_multiplier: 2.0,
        }
    }
}

/// Background health reaper settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthMonitoringConfig {
    /// Master switch for the reaper.
    pub enabled: bool,
    /// Time between sweeps.
    pub check_interval_ms: u64,
    /// Consecutive unhealthy sweeps before an allocation is released.
    pub max_failures: u32,
    /// Actually release stale allocations rather than only reporting them.
    pub cleanup_stale_allocations: bool,
    /// Instances without a heartbeat for this long are expired.
    pub instance_ttl_ms: u64,
}

impl Default for HealthMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 30_000,
            max_failures: 3,
            cleanup_stale_allocations: true,
            instance_ttl_ms: 300_000,
        }
    }
}

/// Startup recovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemRecoveryConfig {
    /// Master switch for recovery.
    pub enabled: bool,
    /// Run the recovery pipeline before serving.
    pub run_on_startup: bool,
    /// Preserve unreadable snapshots as `<path>.corrupt.<epoch>`.
    pub backup_corrupted_state: bool,
    /// Bound on repeated recovery attempts.
    pub max_recovery_attempts: u32,
}

impl Default for SystemRecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_on_startup: true,
            backup_corrupted_state: true,
            max_recovery_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_yields_defaults() {
        let config: UserConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, UserConfig::default());
        assert!(config.auto_allocation.enabled);
        assert_eq!(config.auto_allocation.default_chunk_size, 10);
        assert_eq!(config.auto_allocation.placement, Placement::After);
        assert_eq!(config.recovery.health_monitoring.max_failures, 3);
    }

    #[test]
    fn test_unknown_top_level_key_is_rejected() {
        let result = serde_json::from_str::<UserConfig>(r#"{"svc_types": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_service_type_round_trip() {
        let json = r#"{
            "service_types": {
                "grafana": {
                    "preferred": [11510],
                    "range": [11510, 11519],
                    "instance_mode": "single",
                    "auto_allocated": true
                }
            }
        }"#;
        let config: UserConfig = serde_json::from_str(json).unwrap();
        let entry = &config.service_types["grafana"];
        assert_eq!(entry.range.bounds(), (11510, 11519));
        assert_eq!(entry.instance_mode, InstanceMode::Single);
        assert!(entry.auto_allocated);

        let encoded = serde_json::to_string(&config).unwrap();
        let back: UserConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_placement_serde_names() {
        assert_eq!(
            serde_json::to_string(&Placement::Smart).unwrap(),
            "\"smart\""
        );
        let p: Placement = serde_json::from_str("\"before\"").unwrap();
        assert_eq!(p, Placement::Before);
    }

    #[test]
    fn test_validation_rejects_zero_chunk() {
        let mut config = UserConfig::default();
        config.auto_allocation.default_chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_window() {
        let mut config = UserConfig::default();
        config.auto_allocation.min_port = 60000;
        config.auto_allocation.max_port = 20000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_chunk_rule() {
        let mut config = UserConfig::default();
        config.auto_allocation_rules.push(AutoAllocationRule {
            pattern: "monitor-*".into(),
            chunk_size: Some(0),
            preferred_range_start: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_gap_respects_preserve_gaps() {
        let mut auto = AutoAllocationConfig::default();
        assert_eq!(auto.effective_gap(), 10);
        auto.preserve_gaps = false;
        assert_eq!(auto.effective_gap(), 0);
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = UserConfig::load(&dir.path().join("config.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(UserConfig::load(&path).is_err());
    }
}
