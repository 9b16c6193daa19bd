//! Storage adapters implementing `tmpstore_mem::SpillStore`, plus the check of
//! the configured spill directory.

mod fs;
pub use fs::FsSpillStore;

use std::fs as stdfs;
use std::path::Path;

use tmpstore_core::error::{Error, Result};

/// Make sure `dir` exists (creating it if needed), is a directory, and is writable.
pub fn ensure_directory(dir: &Path) -> Result<()> {
    if !dir.exists() {
        stdfs::create_dir_all(dir).map_err(|e| {
            Error::ConfigInvalid(format!("cannot create spill directory {}: {e}", dir.display()))
        })?;
        tracing::debug!(dir = %dir.display(), "created spill directory");
    }

    let meta = stdfs::metadata(dir).map_err(|e| {
        Error::ConfigInvalid(format!("cannot stat spill directory {}: {e}", dir.display()))
    })?;
    if !meta.is_dir() {
        return Err(Error::ConfigInvalid(format!(
            "spill directory {} is not a directory",
            dir.display()
        )));
    }
    if meta.permissions().readonly() {
        return Err(Error::ConfigInvalid(format!(
            "spill directory {} is not writable",
            dir.display()
        )));
    }
    stdfs::read_dir(dir).map_err(|e| {
        Error::ConfigInvalid(format!("spill directory {} is not readable: {e}", dir.display()))
    })?;
    Ok(())
}
