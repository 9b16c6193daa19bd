#![forbid(unsafe_code)]
//! tmpstore-io: adapters implementing `tmpstore_mem::SpillStore`.
//!
//! - `storage::FsSpillStore`: one regular file per entry (default).
//! - `memory_storage::MemorySpillStore`: process-local map, no disk.

pub mod memory_storage;
pub mod storage;

pub use memory_storage::MemorySpillStore;
pub use storage::{ensure_directory, FsSpillStore};
