//! Shared types for UpSnap.
//!
//! This crate holds the data types passed between the record store
//! (upsnap-store), the monitoring and power-control core (upsnap-core) and
//! the HTTP service (upsnap-service).
//!
//! # Features
//!
//! - Strongly typed MAC addresses and IPv4 subnets
//! - Device and settings records
//! - Scan results
//! - Error types for parsing
//!
//! # Example
//!
//! ```
//! use upsnap_types::{MacAddress, Subnet};
//!
//! let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
//! let subnet: Subnet = "192.168.1.0/24".parse().unwrap();
//! assert_eq!(subnet.host_count(), 254);
//! # let _ = mac;
//! ```

pub mod error;
pub mod net;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use net::{MacAddress, Subnet};
pub use types::{
    DEFAULT_INTERVAL, DEFAULT_NOTIFICATIONS, DEFAULT_SHUTDOWN_COMMAND, DEFAULT_SSH_PORT, Device,
    DeviceStatus, ScanHost, Settings, ShutdownMethod,
};
