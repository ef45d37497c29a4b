//! Loopback port probing.
//!
//! A probe answers one question: would binding `127.0.0.1:port` succeed
//! right now? It is the only authoritative signal about foreign listeners;
//! the allocation registry alone cannot see them. The design is trait-based
//! so tests can substitute a deterministic prober.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::Port;

/// Trait for checking whether a TCP port is currently bindable on loopback.
pub trait PortProber: Send + Sync {
    /// Returns `true` if the port could be bound right now.
    ///
    /// Implementations must never panic and must never leak a socket; any
    /// failure (in use, permission denied, timeout) reads as `false`.
    fn probe(&self, port: Port) -> bool;
}

/// Production prober that attempts a real loopback bind.
///
/// The bind runs on a helper thread so the deadline holds even if the
/// operating system stalls the call; an unanswered probe counts as
/// unavailable.
#[derive(Debug, Clone)]
pub struct SystemProber {
    deadline: Duration,
}

impl SystemProber {
    /// The default probe deadline.
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(1);

    /// Creates a prober with the default one-second deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            deadline: Self::DEFAULT_DEADLINE,
        }
    }

    /// Creates a prober with a custom deadline.
    #[must_use]
    pub const fn with_deadline(deadline: Duration) -> Self {
        Self { deadline }
    }
}

impl Default for SystemProber {
    fn default() -> Self {
        Self::new()
    }
}

impl PortProber for SystemProber {
    fn probe(&self, port: Port) -> bool {
        let (tx, rx) = mpsc::channel();
        let value = port.value();

        let spawned = thread::Builder::new()
            .name(format!("styxy-probe-{value}"))
            .spawn(move || {
                // Listener drops before the send resolves the probe, so the
                // port is free again by the time the caller observes `true`.
                let bindable = TcpListener::bind((Ipv4Addr::LOCALHOST, value)).is_ok();
                let _ = tx.send(bindable);
            });

        match spawned {
            Ok(_) => rx.recv_timeout(self.deadline).unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Deterministic prober for tests.
///
/// Ports marked busy read as unavailable; everything else reads as free.
/// The busy set is behind a mutex so shared `Arc<MockProber>` handles can
/// flip ports mid-test.
#[derive(Debug, Default)]
pub struct MockProber {
    busy: Mutex<HashSet<Port>>,
}

impl MockProber {
    /// Creates a mock prober with every port free.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock prober with the given ports busy.
    #[must_use]
    pub fn with_busy(ports: impl IntoIterator<Item = u16>) -> Self {
        let busy = ports
            .into_iter()
            .filter_map(|p| Port::try_from(p).ok())
            .collect();
        Self {
            busy: Mutex::new(busy),
        }
    }

    /// Marks a port as busy.
    pub fn mark_busy(&self, port: Port) {
        self.busy.lock().insert(port);
    }

    /// Marks a port as free again.
    pub fn mark_free(&self, port: Port) {
        self.busy.lock().remove(&port);
    }

    /// Returns how many ports are currently marked busy.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.busy.lock().len()
    }
}

impl PortProber for MockProber {
    fn probe(&self, port: Port) -> bool {
        !self.busy.lock().contains(&port)
    }
}
