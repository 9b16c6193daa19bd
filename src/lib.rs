#![forbid(unsafe_code)]
//! tmpstore: ephemeral key-addressed byte storage.
//!
//! Content of each entry lives in a memory buffer while the per-entry and the
//! global memory caps allow it, and overflows into one spill file per entry
//! otherwise. Nothing survives the process.
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use std::sync::Arc;
//! use tmpstore::{StorageConfig, StorageHandler, ThreadScheduler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let handler = StorageHandler::new(StorageConfig::default(), Arc::new(ThreadScheduler::new()))?;
//! handler.start()?;
//!
//! let key = handler.create()?;
//! let mut out = handler.open_output_stream(key)?;
//! out.write_all(b"payload")?;
//! out.close()?;
//!
//! let mut content = Vec::new();
//! handler.open_input_stream(key)?.read_to_end(&mut content)?;
//! handler.dispose_and_remove(key)?;
//! handler.stop()?;
//! # Ok(())
//! # }
//! ```

pub use tmpstore_core::{Error, Result, Status, StorageConfig, StorageInfo, StorageKey};
pub use tmpstore_handler::{
    HandlerStats, ManualScheduler, ReadStream, ScheduledTask, Scheduler, StorageHandler, Task,
    ThreadScheduler, WriteStream, CHECK_MEMORY_TASK, CLEAR_DISPOSED_TASK,
};
#[cfg(feature = "async-scheduler")]
pub use tmpstore_handler::TokioScheduler;
pub use tmpstore_io::{ensure_directory, FsSpillStore, MemorySpillStore};
pub use tmpstore_mem::SpillStore;
