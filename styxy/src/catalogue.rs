//! The service-type catalogue.
//!
//! The catalogue maps each service-type name to its preferred ports, its
//! `[lo, hi]` range, and its instance mode. It is composed from the
//! compiled-in defaults overlaid with the user config, and reloaded after
//! any user-config mutation. The catalogue is read-mostly; reloads are
//! serialized by the config writer's lock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::schema::{ServiceTypeConfig, UserConfig};
use crate::error::{Error, Result};
use crate::port::{Port, PortRange};

/// Whether a service type allows one live allocation or many.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceMode {
    /// At most one live allocation; later requests are handed the
    /// existing one.
    Single,
    /// Any number of live allocations.
    #[default]
    Multi,
}

/// One row of the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceType {
    /// Unique, case-sensitive name.
    pub name: String,
    /// Ports tried first, in order, regardless of the range.
    pub preferred: Vec<Port>,
    /// The `[lo, hi]` range owned by this type.
    pub range: PortRange,
    /// One live allocation or many.
    pub instance_mode: InstanceMode,
    /// True when the entry was created by the auto-allocator.
    pub auto_allocated: bool,
}

impl ServiceType {
    /// Returns `true` if this type admits at most one live allocation.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.instance_mode == InstanceMode::Single
    }
}

/// The in-memory service-type catalogue.
///
/// # Examples
///
/// ```
/// use styxy::catalogue::Catalogue;
///
/// let catalogue = Catalogue::shipped();
/// let dev = catalogue.get("dev").unwrap();
/// assert_eq!(dev.range.bounds(), (3000, 3099));
/// ```
#[derive(Debug, Clone)]
pub struct Catalogue {
    entries: BTreeMap<String, ServiceType>,
}

impl Catalogue {
    /// Builds a catalogue from explicit entries, validating invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if two entries share a name or their ranges
    /// overlap.
    pub fn from_entries(entries: Vec<ServiceType>) -> Result<Self> {
        let (catalogue, _warnings) = Self::from_entries_with_warnings(entries)?;
        Ok(catalogue)
    }

    /// Builds a catalogue from explicit entries, also returning soft
    /// warnings (preferred ports outside their range).
    ///
    /// # Errors
    ///
    /// Returns an error if two entries share a name or their ranges
    /// overlap.
    pub fn from_entries_with_warnings(
        entries: Vec<ServiceType>,
    ) -> Result<(Self, Vec<String>)> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if map.insert(entry.name.clone(), entry).is_some() {
                return Err(Error::internal("duplicate service type in catalogue"));
            }
        }
        let catalogue = Self { entries: map };
        let warnings = catalogue.validate()?;
        Ok((catalogue, warnings))
    }

    /// The compiled-in default catalogue.
    ///
    /// Ranges are pairwise disjoint; `ai` is the sole single-instance
    /// type.
    #[must_use]
    pub fn shipped() -> Self {
        let entries = shipped_service_types();
        Self {
            entries: entries.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Composes the shipped defaults with the user config.
    ///
    /// User entries override shipped entries of the same name and add new
    /// ones. Validation failures reject the whole composition so the
    /// caller can keep its previous catalogue.
    ///
    /// # Errors
    ///
    /// Returns an error if the composed ranges are not pairwise disjoint.
    pub fn compose(user: &UserConfig) -> Result<(Self, Vec<String>)> {
        let mut entries = Self::shipped().entries;
        for (name, config) in &user.service_types {
            entries.insert(name.clone(), service_type_from_config(name, config));
        }
        let catalogue = Self { entries };
        let warnings = catalogue.validate()?;
        Ok((catalogue, warnings))
    }

    /// Looks up a service type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceType> {
        self.entries.get(name)
    }

    /// Returns `true` if the catalogue has an entry with this name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates over all entries in name order.
    pub fn all(&self) -> impl Iterator<Item = &ServiceType> {
        self.entries.values()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the catalogue has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns every `[lo, hi]` range, sorted ascending by `lo`.
    #[must_use]
    pub fn ranges(&self) -> Vec<(u16, u16)> {
        let mut ranges: Vec<(u16, u16)> =
            self.entries.values().map(|s| s.range.bounds()).collect();
        ranges.sort_unstable();
        ranges
    }

    /// Checks hard invariants and collects soft warnings.
    ///
    /// Hard: ranges pairwise disjoint. Soft: preferred ports outside
    /// their own range.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first pair of overlapping ranges.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut by_lo: Vec<(&str, PortRange)> = self
            .entries
            .values()
            .map(|s| (s.name.as_str(), s.range))
            .collect();
        by_lo.sort_unstable_by_key(|(_, r)| r.min());

        for pair in by_lo.windows(2) {
            let (a_name, a) = pair[0];
            let (b_name, b) = pair[1];
            if a.overlaps(&b) {
                return Err(Error::invalid_request(format!(
                    "service type ranges overlap: '{a_name}' {a} and '{b_name}' {b}"
                )));
            }
        }

        let mut warnings = Vec::new();
        for entry in self.entries.values() {
            for preferred in &entry.preferred {
                if !entry.range.contains(*preferred) {
                    warnings.push(format!(
                        "service type '{}': preferred port {} lies outside range {}",
                        entry.name, preferred, entry.range
                    ));
                }
            }
        }
        Ok(warnings)
    }
}

fn service_type_from_config(name: &str, config: &ServiceTypeConfig) -> ServiceType {
    ServiceType {
        name: name.to_string(),
        preferred: config.preferred.clone(),
        range: config.range,
        instance_mode: config.instance_mode,
        auto_allocated: config.auto_allocated,
    }
}

fn entry(
    name: &str,
    preferred: &[u16],
    lo: u16,
    hi: u16,
    instance_mode: InstanceMode,
) -> ServiceType {
    ServiceType {
        name: name.to_string(),
        preferred: preferred
            .iter()
            .filter_map(|p| Port::try_from(*p).ok())
            .collect(),
        range: PortRange::from_bounds(lo, hi).expect("shipped range bounds are valid"),
        instance_mode,
        auto_allocated: false,
    }
}

/// The shipped default service types.
#[must_use]
pub fn shipped_service_types() -> Vec<ServiceType> {
    vec![
        entry("dev", &[3000, 3001, 3002, 3003], 3000, 3099, InstanceMode::Multi),
        entry("proxy", &[4000], 4000, 4099, InstanceMode::Multi),
        entry("database", &[5432], 5430, 5499, InstanceMode::Multi),
        entry("docs", &[6100], 6100, 6199, InstanceMode::Multi),
        entry("monitoring", &[7000], 7000, 7099, InstanceMode::Multi),
        entry("api", &[8000, 8080], 8000, 8099, InstanceMode::Multi),
        entry("test", &[9000], 9000, 9099, InstanceMode::Multi),
        entry("ai", &[11430], 11400, 11499, InstanceMode::Single),
    ]
}
