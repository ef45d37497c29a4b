//! Process liveness checks.
//!
//! The reaper and startup recovery need exactly one question answered:
//! does the process that owns an allocation still exist? On Unix this is
//! the classic zero-signal probe; elsewhere we cannot tell and err on the
//! side of keeping allocations alive.

/// Returns `true` if a process with the given pid exists.
///
/// Non-positive pids never name a real owner and read as dead. A
/// permission error from the signal probe means the process exists but
/// belongs to someone else, which still counts as alive.
#[cfg(unix)]
#[allow(unsafe_code)]
#[must_use]
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 performs the existence check without delivering anything.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Returns `true` if a process with the given pid exists.
///
/// On non-Unix targets liveness cannot be probed, so any positive pid is
/// assumed alive; the port probe remains the deciding health signal.
#[cfg(not(unix))]
#[must_use]
pub fn pid_alive(pid: i32) -> bool {
    pid > 0
}
