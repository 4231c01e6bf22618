//! fOS Storage - Origin-scoped web storage
//!
//! In-memory key/value maps per origin with copy-on-write snapshots and a
//! byte quota, mirrored to one durable table per origin by a single
//! background thread. Writes are batched; reads block only until the
//! initial import from disk has finished.
//!
//! ```text
//! StorageNamespace ── StorageArea ── StorageMap
//!                          │
//!                    StorageAreaSync ── StorageSyncManager ── StorageThread
//!                          │                                     │
//!                    DurableTable ◄──────── StorageTracker ──────┘
//! ```

pub mod area;
pub mod config;
pub mod database;
pub mod event;
pub mod map;
pub mod namespace;
pub mod origin;
pub mod sync;
pub mod sync_manager;
pub mod thread;
pub mod tracker;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use area::StorageArea;
pub use config::StorageConfig;
pub use database::{DurableTable, OpenMode, Transaction};
pub use event::{SourceId, StorageEvent, StorageEventSink, StorageType};
pub use map::StorageMap;
pub use namespace::StorageNamespace;
pub use origin::SecurityOrigin;
pub use sync::StorageAreaSync;
pub use sync_manager::StorageSyncManager;
pub use thread::{ActivityGuard, StorageThread};
pub use tracker::{StorageTracker, StorageTrackerClient};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Quota exceeded: {requested} bytes requested, quota is {quota} bytes")]
    QuotaExceeded { quota: usize, requested: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage file: {0}")]
    Corrupt(String),

    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Lock a mutex, recovering the data if a task panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared read access, recovering from poisoning like [`lock`]
pub(crate) fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive write access, recovering from poisoning like [`lock`]
pub(crate) fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}
