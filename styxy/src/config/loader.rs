//! Effective-configuration loading.
//!
//! Composes the compiled-in defaults with the user config file. A broken
//! user config never takes the daemon down: the loader reports what went
//! wrong and the caller keeps its previous catalogue (or the defaults on
//! first boot).

use crate::catalogue::Catalogue;
use crate::config::paths::ConfigPaths;
use crate::config::schema::UserConfig;
use crate::error::Result;

/// The result of loading and composing configuration.
#[derive(Debug)]
pub struct EffectiveConfig {
    /// The parsed user config, defaults when the file is absent.
    pub user: UserConfig,
    /// The composed catalogue (shipped defaults plus user overlay).
    pub catalogue: Catalogue,
    /// Soft validation findings worth logging.
    pub warnings: Vec<String>,
}

/// Loads the effective configuration from the given layout.
///
/// # Errors
///
/// Returns an error when the user config exists but cannot be parsed, or
/// when the composed catalogue violates a hard invariant (overlapping
/// ranges). Callers treat either as "keep what you had".
pub fn load(paths: &ConfigPaths) -> Result<EffectiveConfig> {
    let user = UserConfig::load_or_default(&paths.config_file())?;
    compose(user)
}

/// Composes an already-parsed user config into an effective catalogue.
///
/// # Errors
///
/// Returns an error when the composed catalogue violates a hard
/// invariant.
pub fn compose(user: UserConfig) -> Result<EffectiveConfig> {
    let (catalogue, warnings) = Catalogue::compose(&user)?;
    Ok(EffectiveConfig {
        user,
        catalogue,
        warnings,
    })
}
