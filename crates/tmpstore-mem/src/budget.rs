//! Global memory budget shared by every entry of a handler.
//!
//! All capacity changes across all entries are serialized by one mutex. The
//! [`Allocation`] guard returned by [`BudgetTracker::lock`] *is* that lock:
//! callers hold it for exactly one capacity change (or one reconciliation
//! pass) and must already hold the entry lock of the buffer they touch.
//!
//! Requests never fail. A grow request is clamped to the per-entry and the
//! global headroom; a clamp down to zero leaves the buffer untouched and the
//! caller falls back to the spill file.

use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::buffer::MemoryBuffer;
use crate::tracking::PeakTracker;

pub struct BudgetTracker {
    max_per_entry: usize,
    max_total: usize,
    allocated: Mutex<usize>,
    peak: PeakTracker,
}

impl BudgetTracker {
    pub fn new(max_per_entry: usize, max_total: usize) -> Self {
        Self {
            max_per_entry,
            max_total,
            allocated: Mutex::new(0),
            peak: PeakTracker::new(),
        }
    }

    /// Take the allocation lock.
    pub fn lock(&self) -> Allocation<'_> {
        Allocation {
            tracker: self,
            allocated: self.allocated.lock(),
        }
    }

    /// Current total (advisory; takes the lock briefly).
    pub fn allocated_bytes(&self) -> usize {
        *self.allocated.lock()
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak.peak()
    }

    pub fn max_per_entry(&self) -> usize {
        self.max_per_entry
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }
}

impl fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("max_per_entry", &self.max_per_entry)
            .field("max_total", &self.max_total)
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}

/// Held allocation lock.
pub struct Allocation<'a> {
    tracker: &'a BudgetTracker,
    allocated: MutexGuard<'a, usize>,
}

impl Allocation<'_> {
    /// Bytes currently billed across all entries.
    pub fn allocated(&self) -> usize {
        *self.allocated
    }

    /// Grow `buf` by up to `requested` bytes. Returns the number of bytes granted.
    pub fn grow(&mut self, key: &dyn fmt::Display, buf: &mut MemoryBuffer, requested: usize) -> usize {
        let capacity = buf.capacity();

        let entry_room = match self.tracker.max_per_entry.checked_sub(capacity) {
            Some(room) => room,
            None => {
                warn!(
                    key = %key,
                    capacity,
                    max_per_entry = self.tracker.max_per_entry,
                    "entry capacity above per-entry cap; accounting bug"
                );
                0
            }
        };
        let mut granted = requested.min(entry_room);

        let total_room = match self.tracker.max_total.checked_sub(*self.allocated) {
            Some(room) => room,
            None => {
                warn!(
                    key = %key,
                    allocated = *self.allocated,
                    max_total = self.tracker.max_total,
                    "budget total above global cap; accounting bug"
                );
                0
            }
        };
        if total_room < granted {
            trace!(
                key = %key,
                requested = granted,
                allocated = *self.allocated,
                max_total = self.tracker.max_total,
                "global budget clamps allocation"
            );
            granted = total_room;
        }

        if granted == 0 {
            return 0;
        }

        buf.reallocate(capacity + granted);
        *self.allocated += granted;
        self.tracker.peak.record_used(*self.allocated);
        // Runs once per growing write; stays below debug.
        trace!(
            key = %key,
            granted,
            capacity = buf.capacity(),
            allocated = *self.allocated,
            "allocated memory buffer"
        );
        granted
    }

    /// Shrink `buf` to its valid length. Returns the number of bytes freed.
    pub fn shrink(&mut self, key: &dyn fmt::Display, buf: &mut MemoryBuffer) -> usize {
        let freed = buf.remaining();
        if freed == 0 {
            return 0;
        }

        buf.reallocate(buf.len());
        match self.allocated.checked_sub(freed) {
            Some(next) => *self.allocated = next,
            None => {
                warn!(
                    key = %key,
                    freed,
                    allocated = *self.allocated,
                    "freeing more than allocated; accounting bug"
                );
                *self.allocated = 0;
            }
        }
        debug!(
            key = %key,
            freed,
            capacity = buf.capacity(),
            allocated = *self.allocated,
            "deallocated memory buffer"
        );
        freed
    }

    /// Overwrite the cached total with a recomputed one. Returns true on drift.
    pub fn reconcile(&mut self, actual: usize) -> bool {
        if *self.allocated == actual {
            return false;
        }
        warn!(
            cached = *self.allocated,
            actual,
            "memory budget drift detected, correcting"
        );
        *self.allocated = actual;
        true
    }

    pub fn reset(&mut self) {
        *self.allocated = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_is_clamped_per_entry() {
        let budget = BudgetTracker::new(100, 1000);
        let mut buf = MemoryBuffer::new();
        let granted = budget.lock().grow(&"k", &mut buf, usize::MAX);
        assert_eq!(granted, 100);
        assert_eq!(buf.capacity(), 100);
        assert_eq!(budget.allocated_bytes(), 100);

        // Already at the per-entry cap: nothing more.
        assert_eq!(budget.lock().grow(&"k", &mut buf, 10), 0);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn grow_is_clamped_globally() {
        let budget = BudgetTracker::new(100, 150);
        let mut a = MemoryBuffer::new();
        let mut b = MemoryBuffer::new();
        assert_eq!(budget.lock().grow(&"a", &mut a, 100), 100);
        assert_eq!(budget.lock().grow(&"b", &mut b, 100), 50);
        assert_eq!(budget.lock().grow(&"b", &mut b, 1), 0);
        assert_eq!(budget.allocated_bytes(), 150);
        assert_eq!(budget.peak_bytes(), 150);
    }

    #[test]
    fn grow_keeps_existing_bytes() {
        let budget = BudgetTracker::new(64, 64);
        let mut buf = MemoryBuffer::new();
        budget.lock().grow(&"k", &mut buf, 4);
        buf.append(b"abcd");
        budget.lock().grow(&"k", &mut buf, 4);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn shrink_releases_unused_capacity() {
        let budget = BudgetTracker::new(100, 100);
        let mut buf = MemoryBuffer::new();
        budget.lock().grow(&"k", &mut buf, 100);
        buf.append(&[7u8; 30]);
        assert_eq!(budget.lock().shrink(&"k", &mut buf), 70);
        assert_eq!(buf.capacity(), 30);
        assert_eq!(budget.allocated_bytes(), 30);
        // Already shrunk: no-op.
        assert_eq!(budget.lock().shrink(&"k", &mut buf), 0);

        buf.discard();
        assert_eq!(budget.lock().shrink(&"k", &mut buf), 30);
        assert_eq!(budget.allocated_bytes(), 0);
    }

    #[derive(Clone, Default)]
    struct Logs(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Logs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn growth_is_silent_at_debug_level() {
        let logs = Logs::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let budget = BudgetTracker::new(100, 150);
            let mut a = MemoryBuffer::new();
            let mut b = MemoryBuffer::new();
            for _ in 0..10 {
                budget.lock().grow(&"a", &mut a, 10);
            }
            // Clamped by the global cap.
            assert_eq!(budget.lock().grow(&"b", &mut b, 100), 50);
        });

        let text = String::from_utf8_lossy(&logs.0.lock()).into_owned();
        assert!(text.is_empty(), "unexpected debug output: {text}");
    }

    #[test]
    fn reconcile_overwrites_on_drift() {
        let budget = BudgetTracker::new(10, 10);
        let mut alloc = budget.lock();
        assert!(!alloc.reconcile(0));
        assert!(alloc.reconcile(7));
        assert_eq!(alloc.allocated(), 7);
        alloc.reset();
        assert_eq!(alloc.allocated(), 0);
    }
}
