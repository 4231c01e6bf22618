//! Storage sync manager
//!
//! Owns the storage directory for one local namespace and hands
//! [`StorageAreaSync`](crate::StorageAreaSync) work to the shared
//! [`StorageThread`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{StorageConfig, StorageThread};

/// Extension of per-origin table files
pub const DATABASE_EXTENSION: &str = "localstorage";

#[derive(Debug)]
pub struct StorageSyncManager {
    directory: PathBuf,
    thread: Arc<StorageThread>,
    sync_interval: Duration,
    max_items_per_sync: usize,
}

impl StorageSyncManager {
    pub fn new(config: &StorageConfig, thread: Arc<StorageThread>) -> Arc<Self> {
        Arc::new(Self {
            directory: config.directory.clone(),
            thread,
            sync_interval: config.sync_interval,
            max_items_per_sync: config.max_items_per_sync,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Backing file for an origin's database identifier
    pub fn full_database_path(&self, identifier: &str) -> PathBuf {
        self.directory.join(format!("{identifier}.{DATABASE_EXTENSION}"))
    }

    pub fn thread(&self) -> &Arc<StorageThread> {
        &self.thread
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    pub fn max_items_per_sync(&self) -> usize {
        self.max_items_per_sync
    }

    /// Queue the initial load of an area. False if the thread is shutting down.
    pub fn schedule_import<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.thread.dispatch(task)
    }

    /// Queue a flush, running it inline if the thread is already draining
    /// for termination and the caller is the worker
    pub fn schedule_sync<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_on_thread(task);
    }

    pub fn schedule_delete_empty_database<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_on_thread(task);
    }

    fn run_on_thread<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.thread.is_terminating() && self.thread.is_current() {
            task();
        } else if !self.thread.dispatch(task) {
            tracing::error!("storage task dropped: thread {} has terminated", self.thread.name());
        }
    }

    /// Wait for queued storage work to finish
    pub fn close(&self) {
        self.thread.wait_for_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path() {
        let thread = Arc::new(StorageThread::new("test-storage").unwrap());
        let config = StorageConfig::default().with_directory("/data/LocalStorage");
        let manager = StorageSyncManager::new(&config, thread);
        assert_eq!(
            manager.full_database_path("https_example.com_0"),
            PathBuf::from("/data/LocalStorage/https_example.com_0.localstorage")
        );
    }
}
