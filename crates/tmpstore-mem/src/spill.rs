//! Spill store seam.
//!
//! One regular file (or file-like object) per entry holds the bytes that did
//! not fit into the entry's memory buffer. Implemented by
//! `tmpstore_io::FsSpillStore` for the local filesystem and by
//! `tmpstore_io::MemorySpillStore` for tests and diskless embedding.

use std::io::{self, Read, Write};
use std::path::Path;

pub trait SpillStore: Send + Sync {
    /// Create `path`, or truncate it if it already exists, and return a writer.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Open `path` for reading from the start.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Delete `path`. Idempotent (no error if it doesn't exist).
    fn delete(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;
}
