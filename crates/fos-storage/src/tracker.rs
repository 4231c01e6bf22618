//! Storage tracker
//!
//! Process-wide record of which origins have a local storage file. Rows
//! live in a tracker table next to the origin files; an in-memory set
//! mirrors them for cheap queries. Deletions are marked pending on the
//! calling thread and carried out on the storage thread, where a reopen of
//! the same origin in the meantime cancels them.
//!
//! Lock order: `origins`, then `being_deleted`, then `database`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::database::remove_table_file;
use crate::sync_manager::DATABASE_EXTENSION;
use crate::{lock, DurableTable, OpenMode, SecurityOrigin, StorageNamespace, StorageThread};

/// Tracker table file name
pub const TRACKER_DATABASE: &str = "StorageTracker.db";
/// Table name inside the tracker file
pub const ORIGINS_TABLE: &str = "Origins";

/// Notified of origin changes, on the storage thread
pub trait StorageTrackerClient: Send + Sync {
    /// An origin's storage was created or deleted
    fn did_modify_origin(&self, origin_identifier: &str);

    /// Startup import and reconciliation are done
    fn did_finish_loading_origins(&self) {}
}

pub struct StorageTracker {
    directory: PathBuf,
    thread: Arc<StorageThread>,
    active: AtomicBool,
    finished_importing: AtomicBool,
    origins: Mutex<HashSet<String>>,
    being_deleted: Mutex<HashSet<String>>,
    database: Mutex<Option<DurableTable>>,
    client: Mutex<Option<Arc<dyn StorageTrackerClient>>>,
    namespaces: Mutex<Vec<Weak<StorageNamespace>>>,
}

impl std::fmt::Debug for StorageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageTracker")
            .field("directory", &self.directory)
            .field("active", &self.is_active())
            .field("origins", &lock(&self.origins).len())
            .finish()
    }
}

impl StorageTracker {
    /// Inactive tracker for `directory`; see [`import_origin_identifiers`](Self::import_origin_identifiers)
    pub fn new(directory: impl Into<PathBuf>, thread: Arc<StorageThread>) -> Arc<Self> {
        Arc::new(Self {
            directory: directory.into(),
            thread,
            active: AtomicBool::new(false),
            finished_importing: AtomicBool::new(false),
            origins: Mutex::new(HashSet::new()),
            being_deleted: Mutex::new(HashSet::new()),
            database: Mutex::new(None),
            client: Mutex::new(None),
            namespaces: Mutex::new(Vec::new()),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn finished_importing_origin_identifiers(&self) -> bool {
        self.finished_importing.load(Ordering::SeqCst)
    }

    pub fn tracker_database_path(&self) -> PathBuf {
        self.directory.join(TRACKER_DATABASE)
    }

    pub fn set_client(&self, client: Option<Arc<dyn StorageTrackerClient>>) {
        *lock(&self.client) = client;
    }

    /// Namespace whose live areas are cleared when origins are deleted
    pub fn register_namespace(&self, namespace: &Arc<StorageNamespace>) {
        let mut namespaces = lock(&self.namespaces);
        namespaces.retain(|ns| ns.strong_count() > 0);
        namespaces.push(Arc::downgrade(namespace));
    }

    fn live_namespaces(&self) -> Vec<Arc<StorageNamespace>> {
        lock(&self.namespaces).iter().filter_map(Weak::upgrade).collect()
    }

    fn notify_modified(&self, identifier: &str) {
        let client = lock(&self.client).clone();
        if let Some(client) = client {
            client.did_modify_origin(identifier);
        }
    }

    /// Activate the tracker and queue the startup import: read the tracker
    /// table, then reconcile it with the files on disk.
    pub fn import_origin_identifiers(self: &Arc<Self>) {
        self.active.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        self.thread.dispatch(move || this.sync_import_origin_identifiers());
    }

    fn sync_import_origin_identifiers(self: &Arc<Self>) {
        debug_assert!(self.thread.is_current());
        let identifiers: Vec<String> = {
            let mut database = lock(&self.database);
            // Don't create the tracker file just because the tracker started
            self.open_tracker_database(&mut database, OpenMode::OpenExisting);
            database
                .as_ref()
                .map(|table| table.rows().map(|(origin, _)| origin.to_string()).collect())
                .unwrap_or_default()
        };
        lock(&self.origins).extend(identifiers);

        self.sync_filesystem_and_tracker();

        let client = lock(&self.client).clone();
        if let Some(client) = client {
            let mut origins: Vec<String> = lock(&self.origins).iter().cloned().collect();
            origins.sort();
            for identifier in &origins {
                client.did_modify_origin(identifier);
            }
            client.did_finish_loading_origins();
        }
        self.finished_importing.store(true, Ordering::SeqCst);
        tracing::debug!("imported {} storage origins", lock(&self.origins).len());
    }

    /// Add rows for origin files missing from the tracker table and delete
    /// rows whose file is gone
    pub fn sync_filesystem_and_tracker(self: &Arc<Self>) {
        let files = match list_database_files(&self.directory) {
            Ok(files) => files,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!("failed to list {}: {e}", self.directory.display());
                }
                Vec::new()
            }
        };

        let known: HashSet<String> = lock(&self.origins).clone();
        let mut found = HashSet::new();
        for (identifier, path) in files {
            if !known.contains(&identifier) {
                lock(&self.origins).insert(identifier.clone());
                self.sync_set_origin_details(&identifier, &path);
            }
            found.insert(identifier);
        }

        for identifier in known.difference(&found) {
            tracing::debug!("storage file for {identifier} is gone, dropping tracker row");
            self.schedule_origin_deletion(identifier);
        }
    }

    /// Known origin identifiers, sorted
    pub fn origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = lock(&self.origins).iter().cloned().collect();
        origins.sort();
        origins
    }

    /// Record that `identifier` has a storage file at `path`. Idempotent.
    pub fn register_origin(self: &Arc<Self>, identifier: &str, path: &Path) {
        if !self.is_active() {
            return;
        }
        if !lock(&self.origins).insert(identifier.to_string()) {
            return;
        }

        if self.thread.is_current() {
            self.sync_set_origin_details(identifier, path);
        } else {
            let this = Arc::clone(self);
            let identifier = identifier.to_string();
            let path = path.to_path_buf();
            self.thread
                .dispatch(move || this.sync_set_origin_details(&identifier, &path));
        }
    }

    fn sync_set_origin_details(&self, identifier: &str, path: &Path) {
        {
            let mut database = lock(&self.database);
            self.open_tracker_database(&mut database, OpenMode::CreateIfMissing);
            let Some(table) = database.as_mut() else {
                return;
            };
            let mut transaction = table.transaction();
            transaction.insert(identifier, path.to_string_lossy());
            if let Err(e) = transaction.commit() {
                tracing::error!("unable to record storage origin {identifier}: {e}");
                return;
            }
        }
        self.notify_modified(identifier);
    }

    /// Delete an origin's storage: clear its live areas now, remove the
    /// file and tracker row on the storage thread
    pub fn delete_origin(self: &Arc<Self>, origin: &SecurityOrigin) {
        if !self.is_active() {
            return;
        }
        tracing::debug!("deleting local storage for {origin}");
        // Live areas first; no tracker lock is held while they block on imports
        for namespace in self.live_namespaces() {
            namespace.clear_origin_for_deletion(origin);
        }
        self.schedule_origin_deletion(&origin.database_identifier());
    }

    /// [`delete_origin`](Self::delete_origin) by database identifier
    pub fn delete_origin_with_identifier(self: &Arc<Self>, identifier: &str) {
        match SecurityOrigin::from_database_identifier(identifier) {
            Ok(origin) => self.delete_origin(&origin),
            Err(e) => {
                tracing::warn!("{e}; deleting storage rows only");
                self.delete_origin_identifier(identifier);
            }
        }
    }

    /// Delete an origin whose areas hold nothing (called from the storage thread)
    pub(crate) fn delete_origin_identifier(self: &Arc<Self>, identifier: &str) {
        if self.is_active() {
            self.schedule_origin_deletion(identifier);
        }
    }

    fn schedule_origin_deletion(self: &Arc<Self>, identifier: &str) {
        {
            let mut origins = lock(&self.origins);
            lock(&self.being_deleted).insert(identifier.to_string());
            origins.remove(identifier);
        }
        let this = Arc::clone(self);
        let identifier = identifier.to_string();
        self.thread.dispatch(move || this.sync_delete_origin(&identifier));
    }

    /// Whether a deletion of `identifier` is queued and not cancelled
    pub fn is_deleting_origin(&self, identifier: &str) -> bool {
        lock(&self.being_deleted).contains(identifier)
    }

    /// Called before reopening an origin's file: a queued deletion of it
    /// must not run. The origin is listed again if its row survived.
    pub fn cancel_deleting_origin(&self, identifier: &str) {
        if !self.is_active() {
            return;
        }
        let mut origins = lock(&self.origins);
        if !lock(&self.being_deleted).remove(identifier) {
            return;
        }
        let mut database = lock(&self.database);
        self.open_tracker_database(&mut database, OpenMode::OpenExisting);
        if database.as_ref().is_some_and(|table| table.contains_key(identifier)) {
            origins.insert(identifier.to_string());
        }
    }

    fn sync_delete_origin(&self, identifier: &str) {
        let mut origins = lock(&self.origins);
        let mut being_deleted = lock(&self.being_deleted);
        if !being_deleted.contains(identifier) {
            tracing::error!("attempted to delete origin {identifier} while it was being created");
            return;
        }
        being_deleted.remove(identifier);

        let mut database = lock(&self.database);
        self.open_tracker_database(&mut database, OpenMode::OpenExisting);
        let Some(table) = database.as_mut() else {
            return;
        };
        // Deleting an origin that never stored anything is fine
        let Some(path) = table.get(identifier).map(PathBuf::from) else {
            return;
        };

        let mut transaction = table.transaction();
        transaction.delete(identifier);
        if let Err(e) = transaction.commit() {
            tracing::error!("unable to delete storage origin {identifier} from tracker: {e}");
            return;
        }
        if let Err(e) = remove_table_file(&path) {
            tracing::error!("failed to delete {}: {e}", path.display());
        }
        origins.remove(identifier);

        if table.is_empty() {
            *database = None;
            self.delete_tracker_files();
        }
        drop(database);
        drop(being_deleted);
        drop(origins);

        tracing::debug!("deleted local storage for {identifier}");
        self.notify_modified(identifier);
    }

    /// Delete every origin's storage
    pub fn delete_all_origins(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        {
            let mut origins = lock(&self.origins);
            lock(&self.being_deleted).extend(origins.drain());
        }
        for namespace in self.live_namespaces() {
            namespace.clear_all_origins_for_deletion();
        }
        let this = Arc::clone(self);
        self.thread.dispatch(move || this.sync_delete_all_origins());
    }

    fn sync_delete_all_origins(&self) {
        let mut deleted = Vec::new();
        {
            let mut origins = lock(&self.origins);
            let mut being_deleted = lock(&self.being_deleted);
            let mut database = lock(&self.database);
            self.open_tracker_database(&mut database, OpenMode::OpenExisting);
            let Some(table) = database.as_mut() else {
                return;
            };

            let rows: Vec<(String, String)> = table.rows().map(|(o, p)| (o.to_string(), p.to_string())).collect();
            let mut transaction = table.transaction();
            for (identifier, path) in rows {
                // Reopened since the request
                if !being_deleted.contains(&identifier) {
                    continue;
                }
                if let Err(e) = remove_table_file(Path::new(&path)) {
                    tracing::error!("failed to delete {path}: {e}");
                }
                transaction.delete(&identifier);
                deleted.push(identifier);
            }
            if let Err(e) = transaction.commit() {
                tracing::error!("failed to delete origins from tracker: {e}");
            }
            for identifier in &deleted {
                being_deleted.remove(identifier);
                origins.remove(identifier);
            }

            if table.is_empty() {
                *database = None;
                self.delete_tracker_files();
            }
        }

        tracing::debug!("deleted local storage for {} origins", deleted.len());
        for identifier in &deleted {
            self.notify_modified(identifier);
        }
    }

    /// Backing file path recorded for `identifier`
    pub fn database_path_for_origin(&self, identifier: &str) -> Option<PathBuf> {
        let mut database = lock(&self.database);
        self.open_tracker_database(&mut database, OpenMode::OpenExisting);
        database.as_ref()?.get(identifier).map(PathBuf::from)
    }

    /// Size of the origin's storage file in bytes
    pub fn disk_usage_for_origin(&self, origin: &SecurityOrigin) -> u64 {
        self.database_path_for_origin(&origin.database_identifier())
            .and_then(|path| fs::metadata(path).ok())
            .map_or(0, |metadata| metadata.len())
    }

    fn open_tracker_database(&self, database: &mut Option<DurableTable>, mode: OpenMode) {
        if database.is_some() {
            return;
        }
        let path = self.tracker_database_path();
        if mode == OpenMode::OpenExisting && !path.exists() {
            return;
        }
        match DurableTable::open(&path, ORIGINS_TABLE, mode) {
            Ok(table) => *database = Some(table),
            Err(e) => tracing::error!("failed to open storage tracker database {}: {e}", path.display()),
        }
    }

    /// Remove the tracker file and the storage directory if nothing else is in it
    fn delete_tracker_files(&self) {
        let path = self.tracker_database_path();
        if let Err(e) = remove_table_file(&path) {
            tracing::error!("failed to delete {}: {e}", path.display());
        }
        // Fails while other files remain
        let _ = fs::remove_dir(&self.directory);
    }
}

/// `(identifier, path)` of every origin file in `directory`
fn list_database_files(directory: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let is_database = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(DATABASE_EXTENSION));
        if !is_database || !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()).filter(|s| !s.is_empty()) {
            files.push((stem.to_string(), path.clone()));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ITEM_TABLE;

    fn tracker(dir: &Path) -> Arc<StorageTracker> {
        let thread = Arc::new(StorageThread::new("test-storage").unwrap());
        StorageTracker::new(dir, thread)
    }

    fn write_origin_file(dir: &Path, identifier: &str) -> PathBuf {
        let path = dir.join(format!("{identifier}.localstorage"));
        let mut table = DurableTable::open(&path, ITEM_TABLE, OpenMode::CreateIfMissing).unwrap();
        let mut tx = table.transaction();
        tx.insert("k", "v");
        tx.commit().unwrap();
        path
    }

    #[test]
    fn test_inactive_tracker_ignores_registration() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.register_origin("https_a.com_0", &dir.path().join("a"));
        assert!(tracker.origins().is_empty());
    }

    #[test]
    fn test_register_origin() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.import_origin_identifiers();
        let path = write_origin_file(dir.path(), "https_a.com_0");
        tracker.register_origin("https_a.com_0", &path);
        tracker.register_origin("https_a.com_0", &path);
        tracker.thread.wait_for_idle();

        assert_eq!(tracker.origins(), vec!["https_a.com_0".to_string()]);
        assert_eq!(tracker.database_path_for_origin("https_a.com_0"), Some(path));
        let origin = SecurityOrigin::parse("https://a.com").unwrap();
        assert!(tracker.disk_usage_for_origin(&origin) > 0);
    }

    #[test]
    fn test_reconcile_adds_orphans_and_drops_stale_rows() {
        let dir = tempfile::tempdir().unwrap();
        let kept = write_origin_file(dir.path(), "https_kept.com_0");
        {
            let mut table =
                DurableTable::open(dir.path().join(TRACKER_DATABASE), ORIGINS_TABLE, OpenMode::CreateIfMissing)
                    .unwrap();
            let mut tx = table.transaction();
            tx.insert("https_gone.com_0", dir.path().join("https_gone.com_0.localstorage").to_string_lossy());
            tx.commit().unwrap();
        }

        let tracker = tracker(dir.path());
        tracker.import_origin_identifiers();
        tracker.thread.wait_for_idle();

        assert!(tracker.finished_importing_origin_identifiers());
        assert_eq!(tracker.origins(), vec!["https_kept.com_0".to_string()]);
        assert_eq!(tracker.database_path_for_origin("https_kept.com_0"), Some(kept));
        assert_eq!(tracker.database_path_for_origin("https_gone.com_0"), None);
    }

    #[test]
    fn test_delete_last_origin_removes_tracker_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("LocalStorage");
        fs::create_dir_all(&storage).unwrap();
        let path = write_origin_file(&storage, "https_a.com_0");

        let tracker = tracker(&storage);
        tracker.import_origin_identifiers();
        tracker.thread.wait_for_idle();
        assert!(tracker.tracker_database_path().exists());

        tracker.delete_origin(&SecurityOrigin::parse("https://a.com").unwrap());
        tracker.thread.wait_for_idle();
        assert!(!path.exists());
        assert!(tracker.origins().is_empty());
        assert!(!tracker.tracker_database_path().exists());
        assert!(!storage.exists());
    }

    #[test]
    fn test_cancelled_deletion_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_origin_file(dir.path(), "https_a.com_0");
        let tracker = tracker(dir.path());
        tracker.import_origin_identifiers();
        tracker.thread.wait_for_idle();

        let (release, gate) = std::sync::mpsc::channel::<()>();
        tracker.thread.dispatch(move || {
            let _ = gate.recv();
        });
        tracker.delete_origin_with_identifier("https_a.com_0");
        assert!(tracker.is_deleting_origin("https_a.com_0"));
        tracker.cancel_deleting_origin("https_a.com_0");
        release.send(()).unwrap();
        tracker.thread.wait_for_idle();

        assert!(path.exists());
        assert_eq!(tracker.database_path_for_origin("https_a.com_0"), Some(path));
        assert!(!tracker.is_deleting_origin("https_a.com_0"));
        assert_eq!(tracker.origins(), vec!["https_a.com_0".to_string()]);
    }

    #[test]
    fn test_cancel_without_pending_deletion_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.import_origin_identifiers();
        tracker.thread.wait_for_idle();
        tracker.cancel_deleting_origin("https_a.com_0");
        assert!(tracker.origins().is_empty());
    }

    #[test]
    fn test_delete_all_origins() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_origin_file(dir.path(), "https_a.com_0");
        let b = write_origin_file(dir.path(), "https_b.com_0");
        let tracker = tracker(dir.path());
        tracker.import_origin_identifiers();
        tracker.thread.wait_for_idle();
        assert_eq!(tracker.origins().len(), 2);

        tracker.delete_all_origins();
        tracker.thread.wait_for_idle();
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(tracker.origins().is_empty());
        assert!(!tracker.tracker_database_path().exists());
    }

    #[test]
    fn test_client_notified() {
        #[derive(Default)]
        struct Client {
            modified: Mutex<Vec<String>>,
            finished: AtomicBool,
        }
        impl StorageTrackerClient for Client {
            fn did_modify_origin(&self, origin_identifier: &str) {
                self.modified.lock().unwrap().push(origin_identifier.to_string());
            }
            fn did_finish_loading_origins(&self) {
                self.finished.store(true, Ordering::SeqCst);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        write_origin_file(dir.path(), "https_a.com_0");
        let tracker = tracker(dir.path());
        let client = Arc::new(Client::default());
        tracker.set_client(Some(client.clone()));
        tracker.import_origin_identifiers();
        tracker.thread.wait_for_idle();

        assert!(client.finished.load(Ordering::SeqCst));
        // Once from the orphan-file row, once from the import listing
        assert_eq!(
            *client.modified.lock().unwrap(),
            vec!["https_a.com_0".to_string(), "https_a.com_0".to_string()]
        );
    }
}
