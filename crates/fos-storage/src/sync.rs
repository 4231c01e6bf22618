//! Storage area sync
//!
//! Mirrors one local storage area to its durable table. Construction
//! queues an import on the storage thread; area accessors block in
//! [`StorageAreaSync::block_until_import_complete`] until it has run.
//!
//! Writes collect in a pending map and arm a one-shot batching timer. When
//! it fires, at most `max_items_per_sync` changes move to the hand-off map
//! and one flush task is queued; leftovers re-arm the timer. A flush applies
//! a pending clear first and then the item changes in one transaction.

use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::database::remove_table_file;
use crate::thread::ActivityGuard;
use crate::{lock, write, DurableTable, OpenMode, StorageMap, StorageSyncManager, StorageTracker};

/// Table name inside each origin's file
pub const ITEM_TABLE: &str = "ItemTable";

/// Changed items keyed by key; `None` deletes the row
type ChangeSet = IndexMap<String, Option<String>>;

/// Foreground side: changes not yet handed to the storage thread
#[derive(Default)]
struct PendingChanges {
    changed_items: ChangeSet,
    items_cleared: bool,
    close_database: bool,
    timer_armed: bool,
    /// Bumped whenever the timer is armed or cancelled; stale firings are ignored
    timer_generation: u64,
    timer_guard: Option<ActivityGuard>,
    final_sync_scheduled: bool,
}

/// Hand-off to the flush task
#[derive(Default)]
struct SyncState {
    items_pending_sync: ChangeSet,
    clear_items_while_syncing: bool,
    close_database: bool,
    sync_scheduled: bool,
    sync_in_progress: bool,
    /// The timer fired during a flush; hand off again once it ends
    resync_requested: bool,
    sync_guard: Option<ActivityGuard>,
}

/// Storage thread side
#[derive(Default)]
struct DatabaseState {
    table: Option<DurableTable>,
    open_failed: bool,
}

struct SyncInner {
    identifier: String,
    manager: Arc<StorageSyncManager>,
    tracker: Option<Arc<StorageTracker>>,
    /// Map filled by the import, released once it has run
    import_target: Mutex<Option<Arc<RwLock<StorageMap>>>>,
    pending: Mutex<PendingChanges>,
    sync: Mutex<SyncState>,
    database: Mutex<DatabaseState>,
    import_started: AtomicBool,
    import_complete: Mutex<bool>,
    import_condition: Condvar,
    /// Lock-free copy of `import_complete` for the fast path
    imported: AtomicBool,
    committed: AtomicU64,
}

/// Durable mirror of one local storage area
pub struct StorageAreaSync {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for StorageAreaSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAreaSync")
            .field("identifier", &self.inner.identifier)
            .field("imported", &self.inner.imported.load(Ordering::Relaxed))
            .field("committed", &self.inner.committed.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageAreaSync {
    /// Start syncing `map` with the table for `identifier` and queue its import
    pub fn new(
        manager: Arc<StorageSyncManager>,
        tracker: Option<Arc<StorageTracker>>,
        map: Arc<RwLock<StorageMap>>,
        identifier: impl Into<String>,
    ) -> Self {
        let inner = Arc::new(SyncInner {
            identifier: identifier.into(),
            manager,
            tracker,
            import_target: Mutex::new(Some(map)),
            pending: Mutex::new(PendingChanges::default()),
            sync: Mutex::new(SyncState::default()),
            database: Mutex::new(DatabaseState::default()),
            import_started: AtomicBool::new(false),
            import_complete: Mutex::new(false),
            import_condition: Condvar::new(),
            imported: AtomicBool::new(false),
            committed: AtomicU64::new(0),
        });

        let task = Arc::clone(&inner);
        if !inner.manager.schedule_import(move || task.perform_import()) {
            // Nothing to wait for; the area starts empty
            inner.mark_imported();
        }
        Self { inner }
    }

    /// Database identifier of the origin
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Backing file path
    pub fn database_path(&self) -> PathBuf {
        self.inner.manager.full_database_path(&self.inner.identifier)
    }

    pub fn is_import_complete(&self) -> bool {
        self.inner.imported.load(Ordering::Acquire)
    }

    /// Flush transactions written so far
    pub fn committed_transactions(&self) -> u64 {
        self.inner.committed.load(Ordering::SeqCst)
    }

    /// Wait for the initial import. On the storage thread itself the import
    /// runs inline if it has not yet.
    pub fn block_until_import_complete(&self) {
        self.inner.block_until_import_complete();
    }

    /// Record a change; `None` removes the key
    pub fn schedule_item_for_sync(&self, key: &str, value: Option<&str>) {
        let mut pending = lock(&self.inner.pending);
        if pending.final_sync_scheduled {
            tracing::warn!("{}: write after final sync ignored", self.inner.identifier);
            return;
        }
        pending.changed_items.insert(key.to_string(), value.map(str::to_string));
        self.inner.arm_timer(&mut pending);
    }

    /// Record a clear. Earlier unflushed changes are dropped.
    pub fn schedule_clear(&self) {
        let mut pending = lock(&self.inner.pending);
        if pending.final_sync_scheduled {
            tracing::warn!("{}: clear after final sync ignored", self.inner.identifier);
            return;
        }
        pending.changed_items.clear();
        pending.items_cleared = true;
        self.inner.arm_timer(&mut pending);
    }

    /// Close the table at the next flush so the tracker can delete the file.
    /// No-op if the table is not open.
    pub fn schedule_close_database(&self) {
        if lock(&self.inner.database).table.is_none() {
            return;
        }
        let mut pending = lock(&self.inner.pending);
        if pending.final_sync_scheduled {
            return;
        }
        pending.close_database = true;
        self.inner.arm_timer(&mut pending);
    }

    /// Fire the batching timer now
    pub fn schedule_sync(&self) {
        self.inner.sync_timer_fired(None);
    }

    /// Hand every outstanding change to the storage thread, ignoring the
    /// per-flush cap, then queue removal of the file if the table is empty.
    /// Later writes are ignored.
    pub fn schedule_final_sync(&self) {
        self.block_until_import_complete();
        {
            let mut pending = lock(&self.inner.pending);
            if pending.final_sync_scheduled {
                return;
            }
            pending.final_sync_scheduled = true;
            pending.timer_armed = false;
            pending.timer_generation += 1;
            pending.timer_guard = None;
        }
        tracing::debug!("final sync for {}", self.inner.identifier);
        self.inner.sync_timer_fired(None);

        let task = Arc::clone(&self.inner);
        self.inner
            .manager
            .schedule_delete_empty_database(move || task.delete_empty_database());
    }
}

impl SyncInner {
    fn arm_timer(self: &Arc<Self>, pending: &mut PendingChanges) {
        if pending.timer_armed {
            return;
        }
        pending.timer_armed = true;
        pending.timer_generation += 1;
        let generation = pending.timer_generation;
        if pending.timer_guard.is_none() {
            pending.timer_guard = Some(self.manager.thread().activity_guard());
        }

        // Weak so a queued timer does not keep the area (and the thread) alive
        let this = Arc::downgrade(self);
        let armed = self.manager.thread().dispatch_after(self.manager.sync_interval(), move || {
            if let Some(this) = this.upgrade() {
                this.sync_timer_fired(Some(generation));
            }
        });
        if !armed {
            // Left for the final sync
            pending.timer_armed = false;
        }
    }

    /// Move pending changes to the flush hand-off. `generation` is set when
    /// called from the timer and must match the armed timer.
    fn sync_timer_fired(self: &Arc<Self>, generation: Option<u64>) {
        let mut pending = lock(&self.pending);
        match generation {
            Some(generation) if !pending.timer_armed || generation != pending.timer_generation => return,
            None if !pending.timer_armed
                && pending.changed_items.is_empty()
                && !pending.items_cleared
                && !pending.close_database =>
            {
                return;
            }
            _ => {}
        }
        pending.timer_armed = false;
        pending.timer_generation += 1;
        let final_sync = pending.final_sync_scheduled;

        let schedule_flush = {
            let mut sync = lock(&self.sync);

            // One flush at a time, except when shutting down
            if sync.sync_in_progress && !final_sync {
                sync.resync_requested = true;
                return;
            }

            if pending.items_cleared {
                sync.items_pending_sync.clear();
                sync.clear_items_while_syncing = true;
                pending.items_cleared = false;
            }
            if pending.close_database {
                sync.close_database = true;
                pending.close_database = false;
            }

            let count = if final_sync {
                pending.changed_items.len()
            } else {
                pending.changed_items.len().min(self.manager.max_items_per_sync())
            };
            for (key, value) in pending.changed_items.drain(..count) {
                sync.items_pending_sync.insert(key, value);
            }

            if sync.sync_scheduled {
                false
            } else {
                sync.sync_scheduled = true;
                sync.sync_guard = Some(self.manager.thread().activity_guard());
                true
            }
        };

        if pending.changed_items.is_empty() {
            pending.timer_guard = None;
        } else {
            // Partial sync; finish the job later
            self.arm_timer(&mut pending);
        }
        drop(pending);

        if schedule_flush {
            let this = Arc::clone(self);
            self.manager.schedule_sync(move || this.perform_sync());
        }
    }

    fn perform_sync(self: &Arc<Self>) {
        let (clear_items, items, close_database, guard) = {
            let mut sync = lock(&self.sync);
            debug_assert!(sync.sync_scheduled);
            sync.sync_scheduled = false;
            sync.sync_in_progress = true;
            (
                mem::take(&mut sync.clear_items_while_syncing),
                mem::take(&mut sync.items_pending_sync),
                mem::take(&mut sync.close_database),
                sync.sync_guard.take(),
            )
        };

        self.write_batch(clear_items, items, close_database);

        let resync = {
            let mut sync = lock(&self.sync);
            sync.sync_in_progress = false;
            mem::take(&mut sync.resync_requested)
        };
        drop(guard);
        if resync {
            self.sync_timer_fired(None);
        }
    }

    fn write_batch(&self, clear_items: bool, items: ChangeSet, close_database: bool) {
        if items.is_empty() && !clear_items && !close_database {
            return;
        }
        let mut db = lock(&self.database);
        if db.open_failed {
            return;
        }

        if close_database {
            if items.is_empty() {
                // The tracker is about to delete the file
                if db.table.take().is_some() {
                    tracing::debug!("closed local storage database for {}", self.identifier);
                }
                return;
            }
            // Writes made after the deletion request win over it
            if let Some(tracker) = &self.tracker {
                tracker.cancel_deleting_origin(&self.identifier);
                if let Some(table) = &db.table {
                    tracker.register_origin(&self.identifier, table.path());
                }
            }
        }

        if db.table.is_none() {
            // A clear alone never creates a file
            let mode = if items.is_empty() { OpenMode::OpenExisting } else { OpenMode::CreateIfMissing };
            self.open_database(&mut db, mode);
        }
        let Some(table) = db.table.as_mut() else {
            return;
        };

        let mut transaction = table.transaction();
        if clear_items {
            transaction.clear();
        }
        for (key, value) in items {
            match value {
                Some(value) => transaction.insert(key, value),
                None => {
                    transaction.delete(&key);
                }
            }
        }
        match transaction.commit() {
            Ok(()) => {
                self.committed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => tracing::error!("failed to write local storage for {}: {e}", self.identifier),
        }
    }

    fn open_database(&self, db: &mut DatabaseState, mode: OpenMode) {
        let path = self.manager.full_database_path(&self.identifier);
        if mode == OpenMode::OpenExisting && !path.exists() {
            return;
        }

        // A queued deletion of this origin must not remove the file we reopen
        if let Some(tracker) = &self.tracker {
            tracker.cancel_deleting_origin(&self.identifier);
        }

        match DurableTable::open(&path, ITEM_TABLE, mode) {
            Ok(table) => db.table = Some(table),
            Err(e) => {
                tracing::error!("failed to open local storage database {}: {e}", path.display());
                self.mark_imported();
                db.open_failed = true;
                return;
            }
        }

        if let Some(tracker) = &self.tracker {
            tracker.register_origin(&self.identifier, &path);
        }
    }

    fn perform_import(&self) {
        if self.import_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let target = lock(&self.import_target).take();

        let rows: Option<Vec<(String, String)>> = {
            let mut db = lock(&self.database);
            self.open_database(&mut db, OpenMode::OpenExisting);
            db.table
                .as_ref()
                .map(|table| table.rows().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        };

        if let (Some(rows), Some(map)) = (rows, target) {
            tracing::debug!("imported {} items for {}", rows.len(), self.identifier);
            write(&map).import_batch(rows);
        }
        self.mark_imported();
    }

    fn mark_imported(&self) {
        let mut complete = lock(&self.import_complete);
        *complete = true;
        self.imported.store(true, Ordering::Release);
        self.import_condition.notify_all();
    }

    fn block_until_import_complete(&self) {
        if self.imported.load(Ordering::Acquire) {
            return;
        }
        if self.manager.thread().is_current() {
            // Waiting here would deadlock the queue the import sits in
            self.perform_import();
            return;
        }
        let mut complete = lock(&self.import_complete);
        while !*complete {
            complete = self
                .import_condition
                .wait(complete)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn delete_empty_database(&self) {
        let path = {
            let mut db = lock(&self.database);
            match db.table.as_ref() {
                Some(table) if table.is_empty() => {}
                _ => return,
            }
            db.table.take().map(|table| table.path().to_path_buf())
        };
        let Some(path) = path else {
            return;
        };

        match &self.tracker {
            Some(tracker) if tracker.is_active() => tracker.delete_origin_identifier(&self.identifier),
            _ => {
                if let Err(e) = remove_table_file(&path) {
                    tracing::error!("failed to delete database file {}: {e}", path.display());
                }
            }
        }
    }
}
