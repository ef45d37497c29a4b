//! Error types for the styxy library.
//!
//! All fallible operations return [`Result`], whose error type maps one to
//! one onto the failure kinds surfaced to HTTP clients. The daemon binary
//! converts each variant into a wire payload via [`Error::kind`] and
//! [`Error::remediation`].

use thiserror::Error;

/// Result type alias for operations that may fail with a styxy error.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the styxy library.
#[derive(Debug, Error)]
pub enum Error {
    /// A request named a service type that is not in the catalogue and
    /// auto-allocation was disabled or failed.
    #[error("unknown service type '{service_type}'")]
    UnknownServiceType {
        /// The service type that was requested.
        service_type: String,
    },

    /// A malformed request: bad field, out-of-range port, missing data.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of what was wrong with the request.
        message: String,
    },

    /// Every candidate port for the service type was allocated or
    /// conflicted with a live listener.
    #[error("no ports available for service type '{service_type}' ({attempted} candidates tried)")]
    NoPortsAvailable {
        /// The service type that exhausted its candidates.
        service_type: String,
        /// How many candidate ports were considered.
        attempted: usize,
    },

    /// Auto-allocation could not place a new range inside its configured
    /// port window without overlapping an existing range.
    #[error("no port range available: {reason}")]
    NoRangeAvailable {
        /// Why no slot could be found.
        reason: String,
    },

    /// The advisory lock on the user config could not be acquired within
    /// the bounded wait.
    #[error("config lock not acquired after {waited_ms}ms")]
    ConfigLockTimeout {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// Writing the user config failed; any partial state was rolled back.
    #[error("config write failed: {reason}")]
    ConfigWriteFailed {
        /// The underlying failure.
        reason: String,
    },

    /// A release named a lock id with no live allocation.
    #[error("no allocation found for lock id {lock_id}")]
    LockNotFound {
        /// The unknown lock id, as presented by the caller.
        lock_id: String,
    },

    /// A service type cannot be removed while allocations reference it.
    #[error("service type '{service_type}' has {live} live allocation(s)")]
    ServiceTypeInUse {
        /// The service type that was targeted for removal.
        service_type: String,
        /// Number of live allocations referencing it.
        live: usize,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON encoding or decoding error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An invariant violation or other unexpected internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl Error {
    /// Returns the wire-level error kind for this error.
    ///
    /// These strings are part of the HTTP contract and must stay stable.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownServiceType { .. } => "unknownServiceType",
            Self::InvalidRequest { .. } | Self::ServiceTypeInUse { .. } => "invalidRequest",
            Self::NoPortsAvailable { .. } => "noPortsAvailable",
            Self::NoRangeAvailable { .. } => "noRangeAvailable",
            Self::ConfigLockTimeout { .. } => "configLockTimeout",
            Self::ConfigWriteFailed { .. } => "configWriteFailed",
            Self::LockNotFound { .. } => "lockNotFound",
            Self::Io(_) | Self::Serialization(_) | Self::Internal { .. } => "internal",
        }
    }

    /// Returns a short remediation hint for user-visible failures, when
    /// one exists.
    #[must_use]
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::UnknownServiceType { .. } => {
                Some("try a different service_type, or enable auto_allocation")
            }
            Self::NoPortsAvailable { .. } => {
                Some("release stale allocations with POST /cleanup, or widen the range")
            }
            Self::NoRangeAvailable { .. } => {
                Some("raise auto_allocation.max_port or shrink the chunk size")
            }
            Self::ConfigLockTimeout { .. } => {
                Some("another styxy writer holds the config lock; retry shortly")
            }
            _ => None,
        }
    }

    /// Convenience constructor for invalid-request errors.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Convenience constructor for internal errors.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<crate::port::InvalidPortError> for Error {
    fn from(err: crate::port::InvalidPortError) -> Self {
        Self::InvalidRequest {
            message: err.to_string(),
        }
    }
}

impl From<crate::port::InvalidPortRangeError> for Error {
    fn from(err: crate::port::InvalidPortRangeError) -> Self {
        Self::InvalidRequest {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let cases: Vec<(Error, &str)> = vec![
            (
                Error::UnknownServiceType {
                    service_type: "grafana".into(),
                },
                "unknownServiceType",
            ),
            (Error::invalid_request("missing instance_id"), "invalidRequest"),
            (
                Error::NoPortsAvailable {
                    service_type: "dev".into(),
                    attempted: 104,
                },
                "noPortsAvailable",
            ),
            (
                Error::NoRangeAvailable {
                    reason: "window exhausted".into(),
                },
                "noRangeAvailable",
            ),
            (Error::ConfigLockTimeout { waited_ms: 5000 }, "configLockTimeout"),
            (
                Error::ConfigWriteFailed {
                    reason: "rename failed".into(),
                },
                "configWriteFailed",
            ),
            (
                Error::LockNotFound {
                    lock_id: "b2c3".into(),
                },
                "lockNotFound",
            ),
            (Error::internal("index mismatch"), "internal"),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_service_type_in_use_is_an_invalid_request() {
        let err = Error::ServiceTypeInUse {
            service_type: "dev".into(),
            live: 2,
        };
        assert_eq!(err.kind(), "invalidRequest");
        assert!(err.to_string().contains("2 live allocation"));
    }

    #[test]
    fn test_remediation_hints() {
        let err = Error::UnknownServiceType {
            service_type: "grafana".into(),
        };
        assert!(err.remediation().unwrap().contains("service_type"));

        let err = Error::LockNotFound {
            lock_id: "x".into(),
        };
        assert!(err.remediation().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert_eq!(err.kind(), "internal");
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_display_messages() {
        let err = Error::NoPortsAvailable {
            service_type: "dev".into(),
            attempted: 104,
        };
        let display = format!("{err}");
        assert!(display.contains("dev"));
        assert!(display.contains("104"));
    }
}
