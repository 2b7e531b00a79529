//! Error types for parsing in upsnap-types.

use thiserror::Error;

/// Errors that can occur when parsing addresses and record fields.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// MAC address is not six colon- or hyphen-separated hex octets.
    #[error("Invalid MAC address '{0}': expected 6 colon- or hyphen-separated hex octets")]
    InvalidMac(String),

    /// Subnet is not a valid IPv4 CIDR range.
    #[error("Invalid subnet '{input}': {reason}")]
    InvalidSubnet {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unknown device status value.
    #[error("Invalid device status '{0}': expected 'online' or 'offline'")]
    InvalidStatus(String),
}

/// Result type alias using upsnap-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
