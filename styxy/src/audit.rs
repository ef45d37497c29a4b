//! JSON-lines audit log.
//!
//! Every externally meaningful state change appends one
//! `{timestamp, action, ...context}` object per line. The file rotates at
//! a size threshold, keeping a bounded ring of older segments next to it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::Result;

/// Audit actions emitted by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A port was allocated.
    Allocation,
    /// An allocation was released by its owner.
    Release,
    /// The catalogue was extended for an unknown service type.
    AutoAllocation,
    /// The reaper released a stale allocation.
    StaleAllocationCleaned,
    /// An instance was expired for missing heartbeats.
    InstanceExpired,
    /// Startup recovery finished.
    SystemRecoveryComplete,
}

impl AuditAction {
    /// The wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allocation => "ALLOCATION",
            Self::Release => "RELEASE",
            Self::AutoAllocation => "AUTO_ALLOCATION",
            Self::StaleAllocationCleaned => "STALE_ALLOCATION_CLEANED",
            Self::InstanceExpired => "INSTANCE_EXPIRED",
            Self::SystemRecoveryComplete => "SYSTEM_RECOVERY_COMPLETE",
        }
    }
}

/// Append-only, size-rotated audit log.
#[derive(Debug)]
pub struct AuditLog {
    inner: Mutex<AuditLogInner>,
}

#[derive(Debug)]
struct AuditLogInner {
    path: PathBuf,
    max_bytes: u64,
    keep: usize,
}

impl AuditLog {
    /// Rotation threshold.
    pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

    /// How many rotated segments are retained.
    pub const DEFAULT_KEEP: usize = 5;

    /// Creates a log writing to `path` with the default rotation policy.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self::with_policy(path, Self::DEFAULT_MAX_BYTES, Self::DEFAULT_KEEP)
    }

    /// Creates a log with an explicit rotation policy.
    #[must_use]
    pub fn with_policy(path: PathBuf, max_bytes: u64, keep: usize) -> Self {
        Self {
            inner: Mutex::new(AuditLogInner {
                path,
                max_bytes,
                keep,
            }),
        }
    }

    /// Appends one event.
    ///
    /// `context` should be a JSON object; its fields are merged beside
    /// `timestamp` and `action`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written or rotation fails.
    pub fn append(&self, action: AuditAction, context: Value) -> Result<()> {
        let inner = self.inner.lock();

        let mut event = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "action": action.as_str(),
        });
        if let (Some(base), Some(extra)) = (event.as_object_mut(), context.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }

        inner.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)?;
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// The path events are appended to.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }
}

impl AuditLogInner {
    fn segment(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_bytes {
            return Ok(());
        }

        // Shift the ring: .keep drops, .n -> .n+1, live file -> .1.
        let oldest = self.segment(self.keep);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.keep).rev() {
            let from = self.segment(index);
            if from.exists() {
                fs::rename(&from, self.segment(index + 1))?;
            }
        }
        fs::rename(&self.path, self.segment(1))?;
        File::create(&self.path)?;
        Ok(())
    }
}
