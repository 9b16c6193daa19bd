//! One storage entry: memory buffer, spill file, counters, status, and its own
//! read-write lock.
//!
//! Every method taking `&mut EntryState` expects the caller to hold the entry's
//! exclusive lock; methods that change capacity take the allocation lock
//! themselves, so the order is always entry lock -> allocation lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use tmpstore_core::error::{Error, Result};
use tmpstore_core::{Status, StorageInfo, StorageKey};
use tmpstore_mem::{BudgetTracker, MemoryBuffer, SpillStore};

/// Data guarded by the entry lock.
#[derive(Debug)]
pub(crate) struct EntryState {
    pub(crate) buffer: MemoryBuffer,
    pub(crate) file_used: bool,
    pub(crate) file_len: u64,
    pub(crate) status: Status,
}

impl EntryState {
    fn new() -> Self {
        Self {
            buffer: MemoryBuffer::new(),
            file_used: false,
            file_len: 0,
            status: Status::Working,
        }
    }
}

pub(crate) struct Entry {
    key: StorageKey,
    path: PathBuf,
    state: Arc<RwLock<EntryState>>,
    // Lock-free mirrors for registry-level scans, which must not wait behind a
    // long-lived stream. `billed` changes only under the allocation lock,
    // `disposed` only under the exclusive entry lock.
    billed: AtomicUsize,
    disposed: AtomicBool,
}

impl Entry {
    /// New Working entry with no memory and a spill file that is not created yet.
    pub(crate) fn new(key: StorageKey, path: PathBuf) -> Self {
        Self {
            key,
            path,
            state: Arc::new(RwLock::new(EntryState::new())),
            billed: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> StorageKey {
        self.key
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn state(&self) -> &Arc<RwLock<EntryState>> {
        &self.state
    }

    /// Memory capacity as last billed.
    pub(crate) fn billed(&self) -> usize {
        self.billed.load(Ordering::Acquire)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_status(&self, state: &EntryState, expected: Status) -> Result<()> {
        if state.status != expected {
            return Err(Error::InvalidStatus {
                key: self.key,
                expected,
                actual: state.status,
            });
        }
        Ok(())
    }

    pub(crate) fn info(&self, state: &EntryState) -> StorageInfo {
        StorageInfo::new(
            self.key,
            state.buffer.capacity(),
            state.buffer.len(),
            state.file_used,
            state.file_len,
            state.status,
        )
    }

    /// Request `requested` more bytes of memory (clamped by the budget).
    pub(crate) fn grow(&self, state: &mut EntryState, budget: &BudgetTracker, requested: usize) {
        let mut alloc = budget.lock();
        alloc.grow(&self.key, &mut state.buffer, requested);
        self.billed.store(state.buffer.capacity(), Ordering::Release);
    }

    /// Shrink memory capacity down to the valid length.
    pub(crate) fn shrink(&self, state: &mut EntryState, budget: &BudgetTracker) {
        let mut alloc = budget.lock();
        alloc.shrink(&self.key, &mut state.buffer);
        self.billed.store(state.buffer.capacity(), Ordering::Release);
    }

    /// Start a write session: drop all previous content, release all memory,
    /// then allocate up to `expected` bytes afresh.
    pub(crate) fn begin_write(
        &self,
        state: &mut EntryState,
        budget: &BudgetTracker,
        store: &dyn SpillStore,
        expected: usize,
    ) {
        state.buffer.discard();
        state.file_len = 0;
        if state.file_used {
            state.file_used = false;
            self.remove_spill_file(store);
        }

        let mut alloc = budget.lock();
        alloc.shrink(&self.key, &mut state.buffer);
        alloc.grow(&self.key, &mut state.buffer, expected);
        self.billed.store(state.buffer.capacity(), Ordering::Release);
    }

    /// Release memory, delete the spill file, and mark the entry Disposed.
    pub(crate) fn dispose(&self, state: &mut EntryState, budget: &BudgetTracker, store: &dyn SpillStore) {
        state.buffer.discard();
        self.shrink(state, budget);

        state.file_used = false;
        state.file_len = 0;
        self.remove_spill_file(store);

        state.status = Status::Disposed;
        self.disposed.store(true, Ordering::Release);
        debug!(key = %self.key, "disposed temporary storage");
    }

    // A stray file in the spill directory is harmless, so failure only logs.
    fn remove_spill_file(&self, store: &dyn SpillStore) {
        if !store.exists(&self.path) {
            return;
        }
        if let Err(e) = store.delete(&self.path) {
            warn!(
                key = %self.key,
                path = %self.path.display(),
                error = %e,
                "failed to delete spill file"
            );
        }
    }
}
