#![forbid(unsafe_code)]
//! tmpstore-handler: the storage handler engine.
//!
//! A [`StorageHandler`] keeps a registry of entries, each holding a memory
//! buffer billed against one global budget plus an optional spill file. Data
//! goes in through a [`WriteStream`] and comes out through a [`ReadStream`];
//! both hold the entry's lock until they are closed or dropped.
//!
//! Two maintenance tasks run on an injected [`Scheduler`]: removal of disposed
//! entries and the budget consistency check.

mod entry;
pub mod handler;
pub mod metrics;
pub mod scheduler;
pub mod stream;

pub use handler::{StorageHandler, CHECK_MEMORY_TASK, CLEAR_DISPOSED_TASK};
pub use metrics::HandlerStats;
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, Task, ThreadScheduler};
#[cfg(feature = "async-scheduler")]
pub use scheduler::TokioScheduler;
pub use stream::{ReadStream, WriteStream};
