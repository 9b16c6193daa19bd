//! In-memory spill store.
//!
//! Provides a HashMap-based store that implements the SpillStore trait.
//! Used by tests and by embedders that want the tiering logic without disk.
//! Bytes held here are *not* billed against the memory budget.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tmpstore_mem::SpillStore;

type Files = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

/// Thread-safe in-memory spill store.
#[derive(Clone, Default)]
pub struct MemorySpillStore {
    data: Files,
}

impl MemorySpillStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a path exists
    pub fn contains(&self, path: &Path) -> bool {
        self.data.lock().contains_key(path)
    }

    /// Get the number of stored files
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Size of a stored file, if present.
    pub fn size(&self, path: &Path) -> Option<u64> {
        self.data.lock().get(path).map(|b| b.len() as u64)
    }
}

/// Appends straight into the shared map so readers see every write.
struct MemoryWriter {
    data: Files,
    path: PathBuf,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.lock();
        let file = data.get_mut(&self.path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("spill file removed while writing: {}", self.path.display()),
            )
        })?;
        file.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SpillStore for MemorySpillStore {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        self.data.lock().insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryWriter {
            data: Arc::clone(&self.data),
            path: path.to_path_buf(),
        }))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let data = self.data.lock();
        let bytes = data.get(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("path not found: {}", path.display()),
            )
        })?;
        Ok(Box::new(Cursor::new(bytes.clone())))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.data.lock().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.contains(path)
    }
}
