#![forbid(unsafe_code)]
//! tmpstore-mem: memory buffers, budget accounting, and the spill store seam.
//!
//! Every change of an entry's memory capacity flows through
//! [`BudgetTracker::lock`], which is the single allocation lock of a handler.
//! Capacity is only ever changed by reallocate-and-copy so that the billed
//! amount is always exactly the buffer's length.
//!
//! No filesystem access lives here. The [`SpillStore`] trait is implemented
//! by `tmpstore-io`.

pub mod budget;
pub mod buffer;
pub mod spill;
pub mod tracking;

pub use budget::{Allocation, BudgetTracker};
pub use buffer::MemoryBuffer;
pub use spill::SpillStore;
pub use tracking::PeakTracker;
