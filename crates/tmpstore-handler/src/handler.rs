//! The storage handler: registry of entries, start/stop lifecycle, public
//! operations and the two background maintenance tasks.
//!
//! Lock order is registry -> entry -> allocation. The registry lock is always
//! released before an entry lock is waited on, except in `stop` and
//! `dispose_and_remove`, which hold the registry exclusively while they
//! dispose. Registry-wide scans read the lock-free mirrors on [`Entry`] so
//! they never wait behind open streams.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use tmpstore_core::error::{Error, Result};
use tmpstore_core::{Status, StorageConfig, StorageInfo, StorageKey};
use tmpstore_io::{ensure_directory, FsSpillStore};
use tmpstore_mem::{BudgetTracker, SpillStore};

use crate::entry::Entry;
use crate::metrics::HandlerStats;
use crate::scheduler::{ScheduledTask, Scheduler, Task};
use crate::stream::{ReadStream, WriteStream};

/// Scheduler name of the disposed-entry cleanup task.
pub const CLEAR_DISPOSED_TASK: &str = "clear-disposed";
/// Scheduler name of the budget consistency task.
pub const CHECK_MEMORY_TASK: &str = "check-memory";

struct Registry {
    started: bool,
    entries: HashMap<StorageKey, Arc<Entry>>,
    tasks: Vec<Box<dyn ScheduledTask>>,
}

impl Registry {
    fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(Error::HandlerStopped)
        }
    }

    fn get(&self, key: StorageKey) -> Result<&Arc<Entry>> {
        self.entries.get(&key).ok_or(Error::NotExists { key })
    }

    fn remove_disposed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_disposed());
        before - self.entries.len()
    }

    fn cancel_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.cancel();
        }
    }
}

struct Shared {
    config: StorageConfig,
    store: Arc<dyn SpillStore>,
    budget: Arc<BudgetTracker>,
    registry: RwLock<Registry>,
}

impl Shared {
    /// Recompute the billed total from every entry and overwrite the cached
    /// one on drift. The caller holds the registry lock.
    fn reconcile_budget(&self, registry: &Registry) -> bool {
        let mut alloc = self.budget.lock();
        let actual: usize = registry.entries.values().map(|e| e.billed()).sum();
        alloc.reconcile(actual)
    }

    fn clear_disposed_tick(&self) {
        let mut registry = self.registry.write();
        if !registry.started {
            debug!("clear-disposed tick while stopped; skipping");
            return;
        }
        let removed = registry.remove_disposed();
        if removed > 0 {
            info!(removed, remaining = registry.entries.len(), "cleared disposed storages");
        }
    }

    fn check_memory_tick(&self) {
        let registry = self.registry.read();
        if !registry.started {
            debug!("check-memory tick while stopped; skipping");
            return;
        }
        self.reconcile_budget(&registry);
    }
}

/// Owns every temporary storage and the memory budget they share.
///
/// All operations except [`start`](Self::start), [`stop`](Self::stop) and
/// [`is_started`](Self::is_started) fail with [`Error::HandlerStopped`] while
/// the handler is stopped. A new handler is stopped.
pub struct StorageHandler {
    shared: Arc<Shared>,
    scheduler: Arc<dyn Scheduler>,
}

impl StorageHandler {
    /// Handler spilling to regular files under `config.directory`, which is
    /// created if missing.
    pub fn new(config: StorageConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        config.validate()?;
        ensure_directory(config.directory())?;
        Self::with_spill_store(config, scheduler, Arc::new(FsSpillStore::new()))
    }

    /// Handler spilling into `store`. The directory is only used to name
    /// spill paths and is not checked.
    pub fn with_spill_store(
        config: StorageConfig,
        scheduler: Arc<dyn Scheduler>,
        store: Arc<dyn SpillStore>,
    ) -> Result<Self> {
        config.validate()?;
        let budget = Arc::new(BudgetTracker::new(
            config.max_bytes_per_entry,
            config.max_bytes_total,
        ));
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                store,
                budget,
                registry: RwLock::new(Registry {
                    started: false,
                    entries: HashMap::new(),
                    tasks: Vec::new(),
                }),
            }),
            scheduler,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.shared.config
    }

    pub fn is_started(&self) -> bool {
        self.shared.registry.read().started
    }

    /// Register the background tasks and accept operations. No-op if started.
    pub fn start(&self) -> Result<()> {
        let mut registry = self.shared.registry.write();
        if registry.started {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.shared);
        let tasks = [
            (
                CLEAR_DISPOSED_TASK,
                self.shared.config.clear_disposed_interval(),
                tick(&weak, Shared::clear_disposed_tick),
            ),
            (
                CHECK_MEMORY_TASK,
                self.shared.config.check_memory_interval(),
                tick(&weak, Shared::check_memory_tick),
            ),
        ];
        for (name, period, task) in tasks {
            let Some(period) = period else {
                debug!(task = name, "background task disabled");
                continue;
            };
            match self.scheduler.schedule_at_fixed_rate(name, period, task) {
                Ok(handle) => registry.tasks.push(handle),
                Err(e) => {
                    registry.cancel_tasks();
                    return Err(e.into());
                }
            }
        }

        registry.started = true;
        info!(
            directory = %self.shared.config.directory().display(),
            max_bytes_per_entry = self.shared.config.max_bytes_per_entry,
            max_bytes_total = self.shared.config.max_bytes_total,
            "storage handler started"
        );
        Ok(())
    }

    /// Cancel the background tasks, dispose every Working entry, empty the
    /// registry and reset the budget. No-op if stopped.
    ///
    /// Waits for every open stream to be closed.
    pub fn stop(&self) -> Result<()> {
        let mut registry = self.shared.registry.write();
        if !registry.started {
            return Ok(());
        }

        registry.cancel_tasks();
        self.shared.reconcile_budget(&registry);

        let mut disposed = 0usize;
        for entry in registry.entries.values() {
            let mut state = entry.state().write();
            if state.status.is_working() {
                entry.dispose(&mut state, &self.shared.budget, &*self.shared.store);
                disposed += 1;
            }
        }
        let dropped = registry.entries.len();
        registry.entries.clear();
        self.shared.budget.lock().reset();
        registry.started = false;

        info!(disposed, dropped, "storage handler stopped");
        Ok(())
    }

    /// Keys of every entry, Disposed ones included.
    pub fn keys(&self) -> Result<HashSet<StorageKey>> {
        let registry = self.shared.registry.read();
        registry.ensure_started()?;
        Ok(registry.entries.keys().copied().collect())
    }

    pub fn exists(&self, key: StorageKey) -> Result<bool> {
        let registry = self.shared.registry.read();
        registry.ensure_started()?;
        Ok(registry.entries.contains_key(&key))
    }

    /// Snapshot of an entry's counters, taken under its shared lock.
    pub fn inspect(&self, key: StorageKey) -> Result<StorageInfo> {
        let entry = self.lookup(key)?;
        let state = entry.state().read();
        Ok(entry.info(&state))
    }

    /// Register a new Working entry with no memory and no spill file.
    pub fn create(&self) -> Result<StorageKey> {
        let mut registry = self.shared.registry.write();
        registry.ensure_started()?;

        let mut key = StorageKey::generate();
        while registry.entries.contains_key(&key) {
            key = StorageKey::generate();
        }
        let path = self.shared.config.spill_path(&key);
        registry.entries.insert(key, Arc::new(Entry::new(key, path)));
        debug!(key = %key, entries = registry.entries.len(), "created temporary storage");
        Ok(key)
    }

    /// Open a read session. Blocks while a write session is open on `key`.
    pub fn open_input_stream(&self, key: StorageKey) -> Result<ReadStream> {
        self.try_open_input(key)
            .map_err(|e| Error::stream_open(key, e))
    }

    /// Open a write session that asks for as much memory as the budget grants.
    /// Blocks while any other session is open on `key`.
    pub fn open_output_stream(&self, key: StorageKey) -> Result<WriteStream> {
        self.try_open_output(key, usize::MAX)
            .map_err(|e| Error::stream_open(key, e))
    }

    /// Open a write session for content of a known length; memory is reserved
    /// for `expected_length` bytes up front (clamped by the budget).
    pub fn open_output_stream_with_length(
        &self,
        key: StorageKey,
        expected_length: u64,
    ) -> Result<WriteStream> {
        let expected = usize::try_from(expected_length).unwrap_or(usize::MAX);
        self.try_open_output(key, expected)
            .map_err(|e| Error::stream_open(key, e))
    }

    /// Release memory and spill file and mark the entry Disposed. Fails with
    /// `InvalidStatus` if it already is.
    pub fn dispose(&self, key: StorageKey) -> Result<()> {
        let entry = self.lookup(key)?;
        let mut state = entry.state().write();
        entry.ensure_status(&state, Status::Working)?;
        entry.dispose(&mut state, &self.shared.budget, &*self.shared.store);
        Ok(())
    }

    /// Drop a Disposed entry from the registry.
    pub fn remove(&self, key: StorageKey) -> Result<()> {
        let mut registry = self.shared.registry.write();
        registry.ensure_started()?;
        let entry = registry.get(key)?;
        if !entry.is_disposed() {
            return Err(Error::InvalidStatus {
                key,
                expected: Status::Disposed,
                actual: Status::Working,
            });
        }
        registry.entries.remove(&key);
        debug!(key = %key, "removed temporary storage");
        Ok(())
    }

    /// Drop the entry if it is Disposed. Returns whether it was dropped.
    pub fn remove_if_disposed(&self, key: StorageKey) -> Result<bool> {
        let mut registry = self.shared.registry.write();
        registry.ensure_started()?;
        if !registry.get(key)?.is_disposed() {
            return Ok(false);
        }
        registry.entries.remove(&key);
        debug!(key = %key, "removed temporary storage");
        Ok(true)
    }

    /// `dispose` then `remove` as one step. Holds the registry exclusively,
    /// like `stop`, so it waits for open streams on `key` and no other caller
    /// observes the entry Disposed but still registered.
    pub fn dispose_and_remove(&self, key: StorageKey) -> Result<()> {
        let mut registry = self.shared.registry.write();
        registry.ensure_started()?;
        let entry = Arc::clone(registry.get(key)?);
        {
            let mut state = entry.state().write();
            entry.ensure_status(&state, Status::Working)?;
            entry.dispose(&mut state, &self.shared.budget, &*self.shared.store);
        }
        registry.entries.remove(&key);
        debug!(key = %key, "removed temporary storage");
        Ok(())
    }

    /// Drop every Disposed entry. Returns how many were dropped.
    pub fn clear_disposed(&self) -> Result<usize> {
        let mut registry = self.shared.registry.write();
        registry.ensure_started()?;
        let removed = registry.remove_disposed();
        debug!(removed, remaining = registry.entries.len(), "cleared disposed storages");
        Ok(removed)
    }

    /// Run the budget consistency check now. Returns true if the cached total
    /// had drifted and was corrected.
    pub fn check_memory(&self) -> Result<bool> {
        let registry = self.shared.registry.read();
        registry.ensure_started()?;
        Ok(self.shared.reconcile_budget(&registry))
    }

    pub fn stats(&self) -> Result<HandlerStats> {
        let registry = self.shared.registry.read();
        registry.ensure_started()?;
        Ok(HandlerStats {
            entries: registry.entries.len(),
            disposed: registry.entries.values().filter(|e| e.is_disposed()).count(),
            allocated_bytes: self.shared.budget.allocated_bytes(),
            peak_allocated_bytes: self.shared.budget.peak_bytes(),
        })
    }

    // The registry lock is released on return, before any entry lock is taken.
    fn lookup(&self, key: StorageKey) -> Result<Arc<Entry>> {
        let registry = self.shared.registry.read();
        registry.ensure_started()?;
        registry.get(key).map(Arc::clone)
    }

    fn try_open_input(&self, key: StorageKey) -> Result<ReadStream> {
        let entry = self.lookup(key)?;
        let guard = entry.state().read_arc();
        entry.ensure_status(&guard, Status::Working)?;
        debug!(key = %key, "opened input stream");
        Ok(ReadStream::new(
            Arc::clone(&entry),
            Arc::clone(&self.shared.store),
            guard,
        ))
    }

    fn try_open_output(&self, key: StorageKey, expected: usize) -> Result<WriteStream> {
        let entry = self.lookup(key)?;
        let mut guard = entry.state().write_arc();
        entry.ensure_status(&guard, Status::Working)?;
        entry.begin_write(&mut guard, &self.shared.budget, &*self.shared.store, expected);
        debug!(key = %key, capacity = guard.buffer.capacity(), "opened output stream");
        Ok(WriteStream::new(
            Arc::clone(&entry),
            Arc::clone(&self.shared.budget),
            Arc::clone(&self.shared.store),
            guard,
        ))
    }
}

fn tick(shared: &Weak<Shared>, body: fn(&Shared)) -> Task {
    let shared = Weak::clone(shared);
    Arc::new(move || {
        if let Some(shared) = shared.upgrade() {
            body(&shared);
        }
    })
}

impl Drop for StorageHandler {
    fn drop(&mut self) {
        let mut registry = self.shared.registry.write();
        registry.cancel_tasks();
        if !registry.started {
            return;
        }
        // Entries still locked by leaked streams keep their spill files.
        let mut skipped = 0usize;
        for entry in registry.entries.values() {
            match entry.state().try_write() {
                Some(mut state) if state.status.is_working() => {
                    entry.dispose(&mut state, &self.shared.budget, &*self.shared.store);
                }
                Some(_) => {}
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, "storage handler dropped while streams were open");
        }
        registry.entries.clear();
        registry.started = false;
    }
}

impl std::fmt::Debug for StorageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandler")
            .field("config", &self.shared.config)
            .field("budget", &self.shared.budget)
            .finish_non_exhaustive()
    }
}
