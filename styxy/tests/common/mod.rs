//! Shared fixtures for integration tests.
//!
//! Every test daemon gets its own scratch config directory and a mock
//! prober, so nothing touches real sockets or the user's `~/.styxy`.

use std::path::Path;
use std::sync::Arc;

use styxy::{Daemon, DaemonOptions, MockProber, Port};

/// A daemon wired to a scratch directory and a controllable prober.
pub struct TestDaemon {
    /// The daemon under test.
    pub daemon: Arc<Daemon>,
    /// Shared prober handle; mark ports busy to simulate foreign
    /// listeners.
    pub prober: Arc<MockProber>,
    /// Owns the scratch directory for the test's lifetime.
    pub dir: tempfile::TempDir,
}

/// Boots a daemon against a fresh scratch directory.
#[allow(dead_code)]
pub fn boot() -> TestDaemon {
    boot_with_config(None)
}

/// Boots a daemon with the given `config.json` body pre-written.
#[allow(dead_code)]
pub fn boot_with_config(config_json: Option<&str>) -> TestDaemon {
    let dir = tempfile::tempdir().expect("scratch dir");
    if let Some(body) = config_json {
        std::fs::write(dir.path().join("config.json"), body).expect("write config");
    }
    boot_at(dir)
}

/// Boots a daemon reusing an existing scratch directory (restart
/// scenarios).
#[allow(dead_code)]
pub fn reboot(dir: tempfile::TempDir) -> TestDaemon {
    boot_at(dir)
}

/// Boots a daemon reusing a directory, with specific ports already held
/// by "foreign listeners".
#[allow(dead_code)]
pub fn reboot_with_busy(dir: tempfile::TempDir, busy: &[u16]) -> TestDaemon {
    let prober = Arc::new(MockProber::with_busy(busy.iter().copied()));
    boot_at_with(dir, prober)
}

fn boot_at(dir: tempfile::TempDir) -> TestDaemon {
    boot_at_with(dir, Arc::new(MockProber::new()))
}

fn boot_at_with(dir: tempfile::TempDir, prober: Arc<MockProber>) -> TestDaemon {
    let daemon = Daemon::bootstrap(DaemonOptions {
        config_dir: Some(dir.path().to_path_buf()),
        prober: Some(Arc::clone(&prober) as Arc<dyn styxy::PortProber>),
        version: Some("test".into()),
    })
    .expect("daemon bootstrap");
    TestDaemon {
        daemon: Arc::new(daemon),
        prober,
        dir,
    }
}

/// Shorthand for a validated port.
#[allow(dead_code)]
pub fn port(value: u16) -> Port {
    Port::try_from(value).expect("valid test port")
}

/// Reads the audit log lines from a scratch directory.
#[allow(dead_code)]
pub fn audit_lines(dir: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(dir.join("audit.log"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("audit line is JSON"))
        .collect()
}

/// This process's pid, always alive from the reaper's point of view.
#[allow(dead_code)]
pub fn own_pid() -> i32 {
    std::process::id() as i32
}
