//! Error types for upsnap-core.
//!
//! # Retry Policy
//!
//! None of these errors is retried inside the core. Poll-path errors degrade
//! to a status value and the next scheduled tick is the retry; request-path
//! errors are returned to the caller as the operation's result.
//!
//! | Error Type | Raised by | Handling |
//! |------------|-----------|----------|
//! | [`Error::InvalidAddress`] | wake, scan | Rejected at call site, fix the input |
//! | [`Error::Connect`] | shutdown | Surfaced to the operator |
//! | [`Error::Auth`] | shutdown | Surfaced to the operator, fix credentials |
//! | [`Error::Command`] | shutdown | Surfaced to the operator |
//! | [`Error::ProbeTimeout`] | poller, scanner | Recorded as offline / absent |
//! | [`Error::Probe`] | poller, scanner | Recorded as offline / absent |
//! | [`Error::Config`] | settings import, shutdown | Fatal at startup, 400 on request |
//! | [`Error::Store`] | poller status writes | Logged, re-evaluated next tick |

use std::time::Duration;

use thiserror::Error;

use upsnap_types::ParseError;

/// Errors produced by the monitoring and power-control core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed MAC address, IP address or subnet.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Could not reach the device's remote-command endpoint.
    #[error("Failed to connect to {host}: {reason}")]
    Connect {
        /// Target host.
        host: String,
        /// What went wrong.
        reason: String,
    },

    /// The device rejected the supplied credentials.
    #[error("Authentication rejected by {host}: {reason}")]
    Auth {
        /// Target host.
        host: String,
        /// What the remote side reported.
        reason: String,
    },

    /// The shutdown command ran but exited unsuccessfully.
    #[error("Shutdown command on {host} failed (exit code {status:?}): {stderr}")]
    Command {
        /// Target host.
        host: String,
        /// Exit code, `None` if terminated by a signal.
        status: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// A reachability probe did not answer in time.
    #[error("Probe of {host} timed out after {duration:?}")]
    ProbeTimeout {
        /// Probed host.
        host: String,
        /// Probe timeout.
        duration: Duration,
    },

    /// A reachability probe failed outright (resolution, socket or refusal).
    #[error("Probe of {host} failed: {reason}")]
    Probe {
        /// Probed host.
        host: String,
        /// What went wrong.
        reason: String,
    },

    /// Invalid or ambiguous configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure writing to the record store.
    #[error("Store error: {0}")]
    Store(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid address error.
    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::InvalidAddress(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connect(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connect {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a probe failure.
    pub fn probe(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Probe {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a probe timeout.
    pub fn probe_timeout(host: impl Into<String>, duration: Duration) -> Self {
        Self::ProbeTimeout {
            host: host.into(),
            duration,
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Whether this error came from a reachability probe.
    pub fn is_probe_failure(&self) -> bool {
        matches!(self, Self::Probe { .. } | Self::ProbeTimeout { .. })
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::InvalidAddress(e.to_string())
    }
}

/// Result type alias using upsnap-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connect("10.0.0.5", "connection refused");
        assert_eq!(err.to_string(), "Failed to connect to 10.0.0.5: connection refused");

        let err = Error::probe_timeout("nas.lan", Duration::from_millis(500));
        assert!(err.to_string().contains("nas.lan"));
        assert!(err.to_string().contains("500ms"));

        let err = Error::Command {
            host: "pc".to_string(),
            status: Some(1),
            stderr: "sudo: a password is required".to_string(),
        };
        assert!(err.to_string().contains("exit code Some(1)"));
    }

    #[test]
    fn test_parse_error_becomes_invalid_address() {
        let parse_err = "nope".parse::<upsnap_types::MacAddress>().unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::InvalidAddress(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_is_probe_failure() {
        assert!(Error::probe("h", "refused").is_probe_failure());
        assert!(Error::probe_timeout("h", Duration::from_secs(1)).is_probe_failure());
        assert!(!Error::config("bad").is_probe_failure());
    }
}
