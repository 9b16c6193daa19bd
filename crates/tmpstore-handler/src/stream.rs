//! Dual-tier streams over one storage entry.
//!
//! A [`WriteStream`] owns the entry's exclusive lock and a [`ReadStream`] owns
//! a shared lock, each from open until `close()` (or drop). The logical content
//! of an entry is the valid memory bytes followed by the whole spill file.
//!
//! Holding a stream open blocks every exclusive operation on the same key;
//! always close (or drop) streams on every exit path.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use tracing::{debug, trace};

use tmpstore_core::error::{Error, Result};
use tmpstore_core::StorageKey;
use tmpstore_mem::{BudgetTracker, SpillStore};

use crate::entry::{Entry, EntryState};

type ReadGuard = ArcRwLockReadGuard<RawRwLock, EntryState>;
type WriteGuard = ArcRwLockWriteGuard<RawRwLock, EntryState>;

fn closed(key: StorageKey) -> io::Error {
    Error::StreamClosed { key }.into()
}

fn spill_writer<'a>(
    slot: &'a mut Option<Box<dyn Write + Send>>,
    store: &dyn SpillStore,
    path: &Path,
) -> io::Result<&'a mut Box<dyn Write + Send>> {
    let writer = match slot.take() {
        Some(w) => w,
        None => store.create(path)?,
    };
    Ok(slot.insert(writer))
}

fn spill_reader<'a>(
    slot: &'a mut Option<Box<dyn Read + Send>>,
    store: &dyn SpillStore,
    path: &Path,
) -> io::Result<&'a mut Box<dyn Read + Send>> {
    let reader = match slot.take() {
        Some(r) => r,
        None => store.open(path)?,
    };
    Ok(slot.insert(reader))
}

/// Write session on one entry.
///
/// Bytes go to memory while the entry's buffer can grow; once it is full the
/// rest of the session goes to the spill file.
pub struct WriteStream {
    entry: Arc<Entry>,
    budget: Arc<BudgetTracker>,
    store: Arc<dyn SpillStore>,
    guard: Option<WriteGuard>,
    file: Option<Box<dyn Write + Send>>,
}

impl WriteStream {
    pub(crate) fn new(
        entry: Arc<Entry>,
        budget: Arc<BudgetTracker>,
        store: Arc<dyn SpillStore>,
        guard: WriteGuard,
    ) -> Self {
        Self {
            entry,
            budget,
            store,
            guard: Some(guard),
            file: None,
        }
    }

    pub fn key(&self) -> StorageKey {
        self.entry.key()
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    /// Flush and close the spill file, shrink memory to the written length,
    /// and release the entry lock. A second call fails with `StreamClosed`.
    pub fn close(&mut self) -> Result<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or(Error::StreamClosed { key: self.entry.key() })?;

        let flushed = match self.file.take() {
            Some(mut f) => f.flush(),
            None => Ok(()),
        };
        // Memory is reclaimed and the lock released even if the flush failed.
        self.entry.shrink(&mut guard, &self.budget);
        trace!(
            key = %self.entry.key(),
            memory_len = guard.buffer.len(),
            file_len = guard.file_len,
            "write stream closed"
        );
        drop(guard);

        flushed.map_err(Error::from)
    }
}

impl Write for WriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let key = self.entry.key();
        let state = self.guard.as_deref_mut().ok_or_else(|| closed(key))?;
        if buf.is_empty() {
            return Ok(0);
        }

        if state.buffer.remaining() < buf.len() && !state.file_used {
            self.entry.grow(state, &self.budget, buf.len());
        }

        let taken = state.buffer.append(buf);
        if taken == buf.len() {
            return Ok(taken);
        }

        // Memory is full: the file tier stays engaged for the rest of the session.
        state.file_used = true;
        let spilled = spill_writer(&mut self.file, &*self.store, self.entry.path())
            .and_then(|w| w.write(&buf[taken..]));
        match spilled {
            Ok(n) => {
                state.file_len += n as u64;
                Ok(taken + n)
            }
            // Report what memory took; the error resurfaces on the next call.
            Err(e) if taken > 0 => {
                debug!(key = %key, taken, error = %e, "spill write failed after partial memory write");
                Ok(taken)
            }
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let key = self.entry.key();
        let state = self.guard.as_deref().ok_or_else(|| closed(key))?;
        if !state.file_used {
            return Ok(());
        }
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for WriteStream {
    fn drop(&mut self) {
        if self.guard.is_none() {
            return;
        }
        debug!(key = %self.entry.key(), "write stream dropped without close");
        if let Err(e) = self.close() {
            tracing::warn!(key = %self.entry.key(), error = %e, "closing dropped write stream failed");
        }
    }
}

impl fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteStream")
            .field("key", &self.entry.key())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read session on one entry.
pub struct ReadStream {
    entry: Arc<Entry>,
    store: Arc<dyn SpillStore>,
    guard: Option<ReadGuard>,
    /// Position inside the memory bytes.
    cursor: usize,
    file: Option<Box<dyn Read + Send>>,
    /// Position inside the spill file.
    file_pos: u64,
}

impl ReadStream {
    pub(crate) fn new(entry: Arc<Entry>, store: Arc<dyn SpillStore>, guard: ReadGuard) -> Self {
        Self {
            entry,
            store,
            guard: Some(guard),
            cursor: 0,
            file: None,
            file_pos: 0,
        }
    }

    pub fn key(&self) -> StorageKey {
        self.entry.key()
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    /// Total logical length of the entry's content.
    pub fn content_length(&self) -> io::Result<u64> {
        let key = self.entry.key();
        let state = self.guard.as_deref().ok_or_else(|| closed(key))?;
        Ok(state.buffer.len() as u64 + state.file_len)
    }

    /// Bytes left to read.
    pub fn available(&self) -> io::Result<u64> {
        let key = self.entry.key();
        let state = self.guard.as_deref().ok_or_else(|| closed(key))?;
        let memory_left = state.buffer.len().saturating_sub(self.cursor) as u64;
        let file_left = if state.file_used {
            state.file_len.saturating_sub(self.file_pos)
        } else {
            0
        };
        Ok(memory_left + file_left)
    }

    /// Skip up to `n` bytes; returns how many were skipped.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let key = self.entry.key();
        let state = self.guard.as_deref().ok_or_else(|| closed(key))?;

        let memory_left = state.buffer.len().saturating_sub(self.cursor);
        if memory_left as u64 >= n {
            self.cursor += n as usize;
            return Ok(n);
        }
        self.cursor = state.buffer.len();
        if !state.file_used {
            return Ok(memory_left as u64);
        }

        let reader = spill_reader(&mut self.file, &*self.store, self.entry.path())?;
        let rest = n - memory_left as u64;
        let skipped = io::copy(&mut reader.take(rest), &mut io::sink())?;
        self.file_pos += skipped;
        Ok(memory_left as u64 + skipped)
    }

    /// Close the spill file and release the entry lock. A second call fails
    /// with `StreamClosed`.
    pub fn close(&mut self) -> Result<()> {
        let guard = self
            .guard
            .take()
            .ok_or(Error::StreamClosed { key: self.entry.key() })?;
        self.file = None;
        drop(guard);
        trace!(key = %self.entry.key(), "read stream closed");
        Ok(())
    }
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let key = self.entry.key();
        let state = self.guard.as_deref().ok_or_else(|| closed(key))?;
        if buf.is_empty() {
            return Ok(0);
        }

        let from_memory = state.buffer.read_at(self.cursor, buf);
        self.cursor += from_memory;
        if from_memory == buf.len() || !state.file_used {
            return Ok(from_memory);
        }

        // Memory exhausted mid-call: continue from the spill file.
        let from_file = spill_reader(&mut self.file, &*self.store, self.entry.path())
            .and_then(|r| r.read(&mut buf[from_memory..]));
        match from_file {
            Ok(n) => {
                self.file_pos += n as u64;
                Ok(from_memory + n)
            }
            Err(e) if from_memory > 0 => {
                debug!(key = %key, from_memory, error = %e, "spill read failed after partial memory read");
                Ok(from_memory)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for ReadStream {
    fn drop(&mut self) {
        if self.guard.is_some() {
            // Closing a reader cannot fail once it is open.
            let _ = self.close();
        }
    }
}

impl fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadStream")
            .field("key", &self.entry.key())
            .field("cursor", &self.cursor)
            .field("file_pos", &self.file_pos)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tmpstore_core::StorageConfig;

    use super::*;
    use crate::{ManualScheduler, StorageHandler};

    /// Accepts files but fails every write, and never finds them again.
    struct BrokenStore;

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SpillStore for BrokenStore {
        fn create(&self, _path: &Path) -> io::Result<Box<dyn Write + Send>> {
            Ok(Box::new(FullDisk))
        }

        fn open(&self, _path: &Path) -> io::Result<Box<dyn Read + Send>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "spill file vanished"))
        }

        fn delete(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }

        fn exists(&self, _path: &Path) -> bool {
            false
        }
    }

    #[derive(Clone, Default)]
    struct Logs(Arc<Mutex<Vec<u8>>>);

    impl Write for Logs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn broken_handler() -> StorageHandler {
        let config = StorageConfig {
            directory: "spill".into(),
            max_bytes_per_entry: 8,
            max_bytes_total: 32,
            ..StorageConfig::default()
        };
        let handler = StorageHandler::with_spill_store(
            config,
            Arc::new(ManualScheduler::new()),
            Arc::new(BrokenStore),
        )
        .unwrap();
        handler.start().unwrap();
        handler
    }

    #[test]
    fn partial_transfers_log_the_spill_error() {
        let logs = Logs::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let handler = broken_handler();
            let key = handler.create().unwrap();

            let mut out = handler.open_output_stream(key).unwrap();
            assert_eq!(out.write(&[1u8; 20]).unwrap(), 8);
            // Nothing left for memory, so the spill error surfaces.
            assert!(out.write(&[1u8; 12]).is_err());
            out.close().unwrap();

            let mut input = handler.open_input_stream(key).unwrap();
            let mut buf = [0u8; 20];
            assert_eq!(input.read(&mut buf).unwrap(), 8);
            assert_eq!(&buf[..8], &[1u8; 8]);
            assert!(input.read(&mut buf).is_err());
        });

        let text = String::from_utf8_lossy(&logs.0.lock()).into_owned();
        assert!(text.contains("spill write failed after partial memory write"), "{text}");
        assert!(text.contains("disk full"), "{text}");
        assert!(text.contains("spill read failed after partial memory read"), "{text}");
        assert!(text.contains("spill file vanished"), "{text}");
    }
}
