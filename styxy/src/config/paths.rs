//! Config directory layout.
//!
//! Everything the daemon persists lives under one directory, default
//! `~/.styxy`, overridable programmatically or via `STYXY_CONFIG_DIR`.
//! The directory is created mode 0700 and config files are written 0600;
//! the state is per-user and port assignments can reveal what a user is
//! working on.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "STYXY_CONFIG_DIR";

/// Resolved locations of every file the daemon touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    root: PathBuf,
}

impl ConfigPaths {
    /// Resolves the config directory.
    ///
    /// Order: explicit override, `STYXY_CONFIG_DIR`, `~/.styxy`.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined and
    /// nothing overrides it.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self {
                root: path.to_path_buf(),
            });
        }
        if let Some(env) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(Self {
                root: PathBuf::from(env),
            });
        }
        match home::home_dir() {
            Some(home) => Ok(Self {
                root: home.join(".styxy"),
            }),
            None => Err(Error::invalid_request(
                "cannot determine a home directory; set STYXY_CONFIG_DIR",
            )),
        }
    }

    /// Builds paths rooted at an explicit directory.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory tree with restrictive permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.backups_dir())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700))?;
            fs::set_permissions(self.backups_dir(), fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// The config directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The user config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// The advisory lock file guarding the user config.
    #[must_use]
    pub fn config_lock_file(&self) -> PathBuf {
        self.root.join("config.lock")
    }

    /// The rotating config backup directory.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("config-backups")
    }

    /// The persisted snapshot.
    #[must_use]
    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join("daemon.state")
    }

    /// The bearer token file; auth is enforced when it exists.
    #[must_use]
    pub fn auth_token_file(&self) -> PathBuf {
        self.root.join("auth.token")
    }

    /// The JSON-lines audit log.
    #[must_use]
    pub fn audit_log_file(&self) -> PathBuf {
        self.root.join("audit.log")
    }
}
