//! Point-in-time counters of a handler.
//!
//! Nothing here is exported to a telemetry stack; callers serialize
//! [`HandlerStats`] (it is `serde`-friendly) or log it as they see fit.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerStats {
    /// Entries in the registry, Disposed ones included.
    pub entries: usize,
    /// Entries that are Disposed but not removed yet.
    pub disposed: usize,
    /// Memory currently billed against the global budget.
    pub allocated_bytes: usize,
    /// Highest value `allocated_bytes` has reached.
    pub peak_allocated_bytes: usize,
}

impl HandlerStats {
    pub fn working(&self) -> usize {
        self.entries - self.disposed
    }
}
