//! Atomic user-config writes.
//!
//! One writer at a time per config path, enforced with an OS advisory
//! lock on a dedicated lock file (never on the config itself, which gets
//! replaced by rename). Every write takes a timestamped backup into a
//! rotating directory, lands in `<path>.tmp`, is fsynced, and is renamed
//! over the original. Short readers may skip the lock and rely on rename
//! atomicity; the auto-allocator holds the lock across its whole
//! read-compute-write cycle.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::config::paths::ConfigPaths;
use crate::config::schema::UserConfig;
use crate::error::{Error, Result};

/// Serialized writer for the user config.
#[derive(Debug)]
pub struct ConfigWriter {
    paths: ConfigPaths,
    lock_timeout: Duration,
    max_backups: usize,
}

/// Held advisory lock on the config path.
///
/// Dropping the guard releases the lock.
#[derive(Debug)]
pub struct ConfigLockGuard {
    file: File,
}

impl Drop for ConfigLockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl ConfigWriter {
    /// Default bound on lock acquisition.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default number of retained backups.
    pub const DEFAULT_MAX_BACKUPS: usize = 10;

    /// Creates a writer for the given config layout.
    #[must_use]
    pub fn new(paths: ConfigPaths) -> Self {
        Self {
            paths,
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            max_backups: Self::DEFAULT_MAX_BACKUPS,
        }
    }

    /// Overrides the lock acquisition bound.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Acquires the advisory config lock, waiting at most the configured
    /// bound.
    ///
    /// # Errors
    ///
    /// Returns `configLockTimeout` when the bound elapses.
    pub fn lock(&self) -> Result<ConfigLockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.paths.config_lock_file())?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(ConfigLockGuard { file }),
                Err(_) if started.elapsed() < self.lock_timeout => {
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(_) => {
                    return Err(Error::ConfigLockTimeout {
                        waited_ms: self.lock_timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Reads the current user config while holding the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn read_locked(&self, _guard: &ConfigLockGuard) -> Result<UserConfig> {
        UserConfig::load_or_default(&self.paths.config_file())
    }

    /// Writes the config atomically while holding the lock.
    ///
    /// # Errors
    ///
    /// Returns `configWriteFailed` on any step; the previous config is
    /// restored from backup if the rename had already happened.
    pub fn write_locked(&self, _guard: &ConfigLockGuard, config: &UserConfig) -> Result<()> {
        let target = self.paths.config_file();
        let backup = self.take_backup()?;

        let write = || -> Result<()> {
            let tmp = target.with_extension("json.tmp");
            {
                let mut file = File::create(&tmp)?;
                let body = serde_json::to_vec_pretty(config)?;
                file.write_all(&body)?;
                file.sync_all()?;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
            }
            fs::rename(&tmp, &target)?;
            Ok(())
        };

        if let Err(err) = write() {
            // Whatever landed is suspect; put the last good copy back.
            if let Some(ref backup) = backup {
                let _ = fs::copy(backup, &target);
            }
            return Err(Error::ConfigWriteFailed {
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    /// Locks, applies `mutate`, and writes the result atomically.
    ///
    /// # Errors
    ///
    /// Propagates lock, mutation, and write failures.
    pub fn atomic<F>(&self, mutate: F) -> Result<UserConfig>
    where
        F: FnOnce(&mut UserConfig) -> Result<()>,
    {
        let guard = self.lock()?;
        let mut config = self.read_locked(&guard)?;
        mutate(&mut config)?;
        config.validate()?;
        self.write_locked(&guard, &config)?;
        Ok(config)
    }

    /// Adds a service type to the user config.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` if the name is already present.
    pub fn add_service_type(
        &self,
        name: &str,
        config: crate::config::schema::ServiceTypeConfig,
    ) -> Result<()> {
        self.atomic(|user| {
            if user.service_types.contains_key(name) {
                return Err(Error::invalid_request(format!(
                    "service type '{name}' already exists"
                )));
            }
            user.service_types.insert(name.to_string(), config);
            Ok(())
        })
        .map(|_| ())
    }

    /// Removes a service type from the user config.
    ///
    /// The caller is responsible for checking live allocations first.
    ///
    /// # Errors
    ///
    /// Returns `invalidRequest` if the name is not present.
    pub fn remove_service_type(&self, name: &str) -> Result<()> {
        self.atomic(|user| {
            if user.service_types.remove(name).is_none() {
                return Err(Error::invalid_request(format!(
                    "service type '{name}' is not in the user config"
                )));
            }
            Ok(())
        })
        .map(|_| ())
    }

    /// Copies the current config into the backup ring, pruning old
    /// entries. Returns the backup path, or `None` when there was no
    /// config yet.
    fn take_backup(&self) -> Result<Option<std::path::PathBuf>> {
        let source = self.paths.config_file();
        if !source.exists() {
            return Ok(None);
        }

        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let backup = self.paths.backups_dir().join(format!("config-{stamp}.json"));
        fs::create_dir_all(self.paths.backups_dir())?;
        fs::copy(&source, &backup)?;

        // Prune beyond the retention bound, oldest first. The timestamped
        // names sort chronologically.
        let mut backups: Vec<_> = fs::read_dir(self.paths.backups_dir())?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("config-") && n.ends_with(".json"))
            })
            .collect();
        backups.sort();
        while backups.len() > self.max_backups {
            let oldest = backups.remove(0);
            fs::remove_file(oldest)?;
        }
        Ok(Some(backup))
    }
}
