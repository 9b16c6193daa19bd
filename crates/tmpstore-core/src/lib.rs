#![forbid(unsafe_code)]
//! tmpstore-core: keys, entry status, inspection snapshots, configuration and
//! the error taxonomy shared by every tmpstore crate.
//!
//! Nothing here locks, allocates budget, or touches the filesystem; the I/O
//! side of configuration (directory checks) lives in `tmpstore-io`.

pub mod config;
pub mod error;
pub mod id;
pub mod info;

pub use config::StorageConfig;
pub use error::{Error, Result};
pub use id::StorageKey;
pub use info::{Status, StorageInfo};
