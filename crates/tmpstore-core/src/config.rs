//! Handler configuration that downstream crates can serialize/deserialize.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::StorageKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for spill files. Checked (and created if missing) by `tmpstore-io`.
    pub directory: PathBuf,

    pub file_prefix: String,
    pub file_suffix: String,

    /// Memory cap of a single entry (bytes). Content past this goes to the spill file.
    pub max_bytes_per_entry: usize,

    /// Memory cap across all entries (bytes). Must be `>= max_bytes_per_entry`.
    pub max_bytes_total: usize,

    /// Period of the disposed-entry cleanup task; `<= 0` disables it.
    pub clear_disposed_interval_ms: i64,

    /// Period of the budget consistency check; `<= 0` disables it.
    pub check_memory_interval_ms: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            file_prefix: "tmpstg-".to_string(),
            file_suffix: ".tmp".to_string(),
            max_bytes_per_entry: 2048,
            max_bytes_total: 1024 * 1024, // 1 MiB
            clear_disposed_interval_ms: 300_000,
            check_memory_interval_ms: 60_000,
        }
    }
}

impl StorageConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TMPSTORE_DIRECTORY`: spill directory
    /// - `TMPSTORE_FILE_PREFIX` / `TMPSTORE_FILE_SUFFIX`: spill file name parts
    /// - `TMPSTORE_MAX_BYTES_PER_ENTRY`: per-entry memory cap
    /// - `TMPSTORE_MAX_BYTES_TOTAL`: global memory cap
    /// - `TMPSTORE_CLEAR_DISPOSED_INTERVAL_MS`: cleanup period
    /// - `TMPSTORE_CHECK_MEMORY_INTERVAL_MS`: consistency check period
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TMPSTORE_DIRECTORY") {
            cfg.directory = PathBuf::from(s);
        }

        if let Ok(s) = std::env::var("TMPSTORE_FILE_PREFIX") {
            cfg.file_prefix = s;
        }

        if let Ok(s) = std::env::var("TMPSTORE_FILE_SUFFIX") {
            cfg.file_suffix = s;
        }

        if let Ok(s) = std::env::var("TMPSTORE_MAX_BYTES_PER_ENTRY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_bytes_per_entry = v;
            }
        }

        if let Ok(s) = std::env::var("TMPSTORE_MAX_BYTES_TOTAL") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_bytes_total = v;
            }
        }

        if let Ok(s) = std::env::var("TMPSTORE_CLEAR_DISPOSED_INTERVAL_MS") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.clear_disposed_interval_ms = v;
            }
        }

        if let Ok(s) = std::env::var("TMPSTORE_CHECK_MEMORY_INTERVAL_MS") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.check_memory_interval_ms = v;
            }
        }

        cfg
    }

    /// Check the static values. The directory itself is checked by the IO layer.
    pub fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("spill directory must not be empty".into()));
        }
        if self.max_bytes_per_entry == 0 {
            return Err(Error::ConfigInvalid(
                "max_bytes_per_entry must be greater than 0".into(),
            ));
        }
        if self.max_bytes_total == 0 {
            return Err(Error::ConfigInvalid(
                "max_bytes_total must be greater than 0".into(),
            ));
        }
        if self.max_bytes_per_entry > self.max_bytes_total {
            return Err(Error::ConfigInvalid(format!(
                "max_bytes_per_entry ({}) must not exceed max_bytes_total ({})",
                self.max_bytes_per_entry, self.max_bytes_total
            )));
        }
        Ok(())
    }

    /// `{directory}/{prefix}{key}{suffix}`
    pub fn spill_path(&self, key: &StorageKey) -> PathBuf {
        self.directory
            .join(format!("{}{}{}", self.file_prefix, key, self.file_suffix))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn clear_disposed_interval(&self) -> Option<Duration> {
        positive_millis(self.clear_disposed_interval_ms)
    }

    pub fn check_memory_interval(&self) -> Option<Duration> {
        positive_millis(self.check_memory_interval_ms)
    }
}

fn positive_millis(ms: i64) -> Option<Duration> {
    if ms > 0 {
        Some(Duration::from_millis(ms as u64))
    } else {
        None
    }
}
