use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tmpstore_mem::SpillStore;

/// Local filesystem spill store (paths are host paths).
#[derive(Debug, Clone, Default)]
pub struct FsSpillStore;

impl FsSpillStore {
    pub fn new() -> Self {
        Self
    }
}

impl SpillStore for FsSpillStore {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(BufWriter::new(f)))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let f = File::open(path)?;
        Ok(Box::new(BufReader::new(f)))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}
