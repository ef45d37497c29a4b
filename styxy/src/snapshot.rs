//! Snapshot persistence.
//!
//! The snapshot is the only durable state: the allocation list, the
//! singleton map, and the instance table. Saves are debounced and run on
//! a dedicated writer thread so they never block an allocation; the write
//! itself is tmp-file plus rename, the same discipline as the config
//! writer.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::instance::Instance;
use crate::registry::{Allocation, SingletonRef};

/// The durable shape on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every live allocation.
    #[serde(default)]
    pub allocations: Vec<Allocation>,
    /// Singleton refs by service type.
    #[serde(default, rename = "singletonServices")]
    pub singleton_services: BTreeMap<String, SingletonRef>,
    /// Registered client instances.
    #[serde(default)]
    pub instances: Vec<Instance>,
    /// The daemon version that wrote the snapshot.
    #[serde(default)]
    pub version: String,
}

impl Snapshot {
    /// Creates an empty snapshot stamped with a version.
    #[must_use]
    pub fn empty(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }
}

/// Loads and saves snapshots at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store for the given path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The snapshot path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Reads the snapshot.
    ///
    /// `Ok(None)` means the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or
    /// decoded; recovery decides whether to back it up and start fresh.
    pub fn read(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        Ok(Some(snapshot))
    }

    /// Writes the snapshot atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp write, fsync, or rename fails.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("state.tmp");
        {
            let mut file = File::create(&tmp)?;
            let body = serde_json::to_vec_pretty(snapshot)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Moves an unreadable snapshot aside as
    /// `<path>.corrupt.<epoch-seconds>` and returns the backup path.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    pub fn backup_corrupt(&self) -> Result<PathBuf> {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".corrupt.{epoch}"));
        let backup = PathBuf::from(name);
        fs::rename(&self.path, &backup)?;
        Ok(backup)
    }
}

/// Wakes the snapshot writer after mutations.
///
/// Mutating paths call [`SaveSignal::mark_dirty`]; the writer thread
/// coalesces bursts and performs one save per quiet period.
#[derive(Debug, Default)]
pub struct SaveSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct SignalState {
    dirty: bool,
    shutdown: bool,
}

impl SaveSignal {
    /// Creates a quiescent signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags that durable state changed.
    pub fn mark_dirty(&self) {
        let mut state = self.state.lock();
        state.dirty = true;
        self.condvar.notify_all();
    }

    /// Asks the writer to flush and exit.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.condvar.notify_all();
    }

    /// Blocks until something happens, then reports `(dirty, shutdown)`.
    fn next_wakeup(&self) -> (bool, bool) {
        let mut state = self.state.lock();
        while !state.dirty && !state.shutdown {
            self.condvar.wait(&mut state);
        }
        (state.dirty, state.shutdown)
    }

    /// Waits out the coalescing window, returning early on shutdown.
    fn wait_debounce(&self, debounce: Duration) {
        let deadline = std::time::Instant::now() + debounce;
        let mut state = self.state.lock();
        while !state.shutdown {
            if self
                .condvar
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
    }

    /// Clears and returns the dirty flag without blocking.
    fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.state.lock().dirty)
    }

    /// Returns `true` once shutdown was requested.
    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

/// Handle to the background snapshot writer.
#[derive(Debug)]
pub struct SnapshotWriterHandle {
    signal: Arc<SaveSignal>,
    thread: Option<JoinHandle<()>>,
}

impl SnapshotWriterHandle {
    /// Flushes pending state and joins the writer thread.
    pub fn finish(mut self) {
        self.signal.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SnapshotWriterHandle {
    fn drop(&mut self) {
        self.signal.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawns the dedicated snapshot writer.
///
/// `source` captures the current durable state; it must not hold long
/// locks. `debounce` is how long the writer waits after a wakeup to
/// swallow bursts of mutations into one save.
pub fn spawn_writer<F>(
    store: SnapshotStore,
    signal: Arc<SaveSignal>,
    debounce: Duration,
    source: F,
) -> SnapshotWriterHandle
where
    F: Fn() -> Snapshot + Send + 'static,
{
    let writer_signal = Arc::clone(&signal);
    let thread = std::thread::Builder::new()
        .name("styxy-snapshot".into())
        .spawn(move || loop {
            let (dirty, shutdown) = writer_signal.next_wakeup();

            if dirty {
                if !shutdown {
                    // Coalesce: anything that lands during the debounce
                    // window rides along in the same save. Shutdown cuts
                    // the window short.
                    writer_signal.wait_debounce(debounce);
                }
                writer_signal.take_dirty();
                let snapshot = source();
                if let Err(err) = store.save(&snapshot) {
                    tracing::warn!(error = %err, path = %store.path().display(), "snapshot save failed");
                }
            }

            if writer_signal.is_shutdown() {
                // One final pass in case mutations raced the shutdown.
                if writer_signal.take_dirty() {
                    let snapshot = source();
                    if let Err(err) = store.save(&snapshot) {
                        tracing::warn!(error = %err, "final snapshot save failed");
                    }
                }
                break;
            }
        })
        .ok();

    SnapshotWriterHandle {
        signal,
        thread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::port::Port;
    use crate::registry::LockId;

    fn allocation(port: u16) -> Allocation {
        Allocation {
            port: Port::try_from(port).unwrap(),
            lock_id: LockId::generate(),
            service_type: "dev".into(),
            service_name: None,
            instance_id: "i1".into(),
            project_path: None,
            process_id: Some(123),
            allocated_at: Utc::now(),
        }
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("daemon.state"));
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_save_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("daemon.state"));

        let mut snapshot = Snapshot::empty("0.1.0");
        snapshot.allocations.push(allocation(3000));
        store.save(&snapshot).unwrap();

        let loaded = store.read().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.version, "0.1.0");
    }

    #[test]
    fn test_read_corrupt_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state");
        fs::write(&path, "corrupted").unwrap();

        let store = SnapshotStore::new(path);
        assert!(store.read().is_err());
    }

    #[test]
    fn test_backup_corrupt_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state");
        fs::write(&path, "corrupted").unwrap();

        let store = SnapshotStore::new(path.clone());
        let backup = store.backup_corrupt().unwrap();

        assert!(!path.exists());
        assert!(backup
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("daemon.state.corrupt."));
        assert_eq!(fs::read_to_string(backup).unwrap(), "corrupted");
    }

    #[test]
    fn test_snapshot_wire_field_names() {
        let snapshot = Snapshot::empty("0.1.0");
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("allocations").is_some());
        assert!(value.get("singletonServices").is_some());
        assert!(value.get("instances").is_some());
        assert_eq!(value["version"], "0.1.0");
    }

    #[test]
    fn test_writer_saves_after_mark_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("daemon.state"));
        let signal = Arc::new(SaveSignal::new());

        let handle = spawn_writer(
            store.clone(),
            Arc::clone(&signal),
            Duration::from_millis(10),
            || {
                let mut snapshot = Snapshot::empty("test");
                snapshot.allocations.push(allocation(3000));
                snapshot
            },
        );

        signal.mark_dirty();
        // Wait out the debounce plus slack.
        std::thread::sleep(Duration::from_millis(200));
        let loaded = store.read().unwrap().unwrap();
        assert_eq!(loaded.allocations.len(), 1);
        handle.finish();
    }

    #[test]
    fn test_writer_flushes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("daemon.state"));
        let signal = Arc::new(SaveSignal::new());

        let handle = spawn_writer(
            store.clone(),
            Arc::clone(&signal),
            Duration::from_secs(60), // debounce far longer than the test
            || Snapshot::empty("flushed"),
        );

        signal.mark_dirty();
        signal.shutdown();
        handle.finish();

        let loaded = store.read().unwrap().unwrap();
        assert_eq!(loaded.version, "flushed");
    }
}
