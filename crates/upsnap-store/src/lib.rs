//! Record store for UpSnap.
//!
//! This crate provides SQLite-based storage for device records and the
//! settings record, with change hooks so the rest of the system can react to
//! writes.
//!
//! # Features
//!
//! - Device CRUD with typed MAC addresses and shutdown configuration
//! - Status writes from the poller
//! - Singleton settings record
//! - Change hooks fired after every committed write
//!
//! # Example
//!
//! ```no_run
//! use upsnap_store::{NewDevice, Store};
//!
//! let mut store = Store::open_default()?;
//! store.on_change(|event| println!("{} changed", event.collection));
//!
//! let device = store.create_device(NewDevice::new(
//!     "desktop",
//!     "AA:BB:CC:DD:EE:FF".parse().unwrap(),
//!     "192.168.1.20",
//! ))?;
//! println!("created {}", device.id);
//! # Ok::<(), upsnap_store::Error>(())
//! ```

mod error;
mod models;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{Action, ChangeEvent, ChangeHook, Collection, NewDevice};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/upsnap/data.db`
/// - macOS: `~/Library/Application Support/upsnap/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\upsnap\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("upsnap")
        .join("data.db")
}
