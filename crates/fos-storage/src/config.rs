//! Storage Configuration

use std::path::PathBuf;
use std::time::Duration;

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one `.localstorage` file per origin plus the tracker table
    pub directory: PathBuf,

    /// Per-origin quota (bytes, two per UTF-16 code unit)
    pub quota: usize,

    /// Batching window between a write and its flush to disk
    pub sync_interval: Duration,

    /// Maximum key/value pairs written per flush, final syncs excepted
    pub max_items_per_sync: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("LocalStorage"),
            quota: 5 * 1024 * 1024, // 5MB
            sync_interval: Duration::from_secs(1),
            max_items_per_sync: 100,
        }
    }
}

impl StorageConfig {
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_max_items_per_sync(mut self, max_items: usize) -> Self {
        self.max_items_per_sync = max_items.max(1);
        self
    }
}
