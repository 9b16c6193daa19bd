//! Entry status and the inspection snapshot returned by `inspect()`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::StorageKey;

/// Lifecycle state of a storage entry. `Working -> Disposed` is the only
/// transition and it is never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Working,
    Disposed,
}

impl Status {
    pub fn is_working(self) -> bool {
        matches!(self, Status::Working)
    }

    pub fn is_disposed(self) -> bool {
        matches!(self, Status::Disposed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Working => f.write_str("working"),
            Status::Disposed => f.write_str("disposed"),
        }
    }
}

/// Point-in-time counters of one entry, taken under the entry's shared lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub key: StorageKey,
    /// Bytes reserved in memory and billed against the budget.
    pub memory_capacity: usize,
    /// Valid bytes held in memory (`<= memory_capacity`).
    pub memory_len: usize,
    pub file_used: bool,
    /// Bytes spilled to the backing file.
    pub file_len: u64,
    pub status: Status,
    /// `memory_len + file_len`.
    pub content_length: u64,
}

impl StorageInfo {
    pub fn new(
        key: StorageKey,
        memory_capacity: usize,
        memory_len: usize,
        file_used: bool,
        file_len: u64,
        status: Status,
    ) -> Self {
        Self {
            key,
            memory_capacity,
            memory_len,
            file_used,
            file_len,
            status,
            content_length: memory_len as u64 + file_len,
        }
    }
}
