//! Storage area
//!
//! The `Storage` object behind `localStorage` / `sessionStorage` for one
//! origin. Every accessor first waits for the initial import.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::{
    read, write, Result, SecurityOrigin, SourceId, StorageAreaSync, StorageEvent, StorageEventSink, StorageMap, StorageType,
};

/// Items of one origin plus their optional durable mirror
pub struct StorageArea {
    kind: StorageType,
    origin: SecurityOrigin,
    map: Arc<RwLock<StorageMap>>,
    sync: Option<StorageAreaSync>,
    events: Option<Arc<dyn StorageEventSink>>,
    is_shutdown: AtomicBool,
}

impl std::fmt::Debug for StorageArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageArea")
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .field("sync", &self.sync)
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

impl StorageArea {
    /// Session area held in memory only
    pub fn session(origin: SecurityOrigin, quota: usize, events: Option<Arc<dyn StorageEventSink>>) -> Self {
        Self {
            kind: StorageType::Session,
            origin,
            map: Arc::new(RwLock::new(StorageMap::new(quota))),
            sync: None,
            events,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Local area; `sync_for` builds the durable mirror around the area's map
    pub fn local<F>(
        origin: SecurityOrigin,
        quota: usize,
        events: Option<Arc<dyn StorageEventSink>>,
        sync_for: F,
    ) -> Self
    where
        F: FnOnce(Arc<RwLock<StorageMap>>) -> StorageAreaSync,
    {
        let map = Arc::new(RwLock::new(StorageMap::new(quota)));
        let sync = sync_for(Arc::clone(&map));
        Self {
            kind: StorageType::Local,
            origin,
            map,
            sync: Some(sync),
            events,
            is_shutdown: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> StorageType {
        self.kind
    }

    pub fn origin(&self) -> &SecurityOrigin {
        &self.origin
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Durable mirror, for local areas
    pub fn storage_sync(&self) -> Option<&StorageAreaSync> {
        self.sync.as_ref()
    }

    fn block_until_import_complete(&self) {
        debug_assert!(!self.is_shutdown(), "storage area used after close");
        if let Some(sync) = &self.sync {
            sync.block_until_import_complete();
        }
    }

    /// Number of items
    pub fn length(&self) -> usize {
        self.block_until_import_complete();
        read(&self.map).len()
    }

    /// Key at enumeration position `index`
    pub fn key(&self, index: usize) -> Option<String> {
        self.block_until_import_complete();
        read(&self.map).key_at(index).map(str::to_string)
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.block_until_import_complete();
        read(&self.map).get(key).map(str::to_string)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.block_until_import_complete();
        read(&self.map).contains(key)
    }

    /// Set an item. Quota errors leave the area unchanged and notify no one.
    pub fn set_item(&self, key: &str, value: &str, source: SourceId) -> Result<()> {
        self.block_until_import_complete();
        let old_value = write(&self.map).set(key, value)?;
        if old_value.as_deref() == Some(value) {
            return Ok(());
        }

        if let Some(sync) = &self.sync {
            sync.schedule_item_for_sync(key, Some(value));
        }
        self.dispatch(Some(key), old_value, Some(value.to_string()), source);
        Ok(())
    }

    pub fn remove_item(&self, key: &str, source: SourceId) {
        self.block_until_import_complete();
        let Some(old_value) = write(&self.map).remove(key) else {
            return;
        };

        if let Some(sync) = &self.sync {
            sync.schedule_item_for_sync(key, None);
        }
        self.dispatch(Some(key), Some(old_value), None, source);
    }

    /// Remove every item. Clearing an empty area does nothing.
    pub fn clear(&self, source: SourceId) {
        self.block_until_import_complete();
        {
            let mut map = write(&self.map);
            if map.is_empty() {
                return;
            }
            let quota = map.quota();
            *map = StorageMap::new(quota);
        }

        if let Some(sync) = &self.sync {
            sync.schedule_clear();
        }
        self.dispatch(None, None, None, source);
    }

    /// Drop all items because the origin's data is being deleted. Fires no
    /// event; the durable table is cleared and closed at the next flush.
    pub fn clear_for_origin_deletion(&self) {
        self.block_until_import_complete();
        {
            let mut map = write(&self.map);
            if !map.is_empty() {
                let quota = map.quota();
                *map = StorageMap::new(quota);
            }
        }

        if let Some(sync) = &self.sync {
            sync.schedule_clear();
            sync.schedule_close_database();
        }
    }

    /// Flush pending writes now instead of waiting for the batching timer
    pub fn sync(&self) {
        if let Some(sync) = &self.sync {
            sync.schedule_sync();
        }
    }

    /// Final sync; the area must not be used afterwards
    pub fn close(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sync) = &self.sync {
            sync.schedule_final_sync();
        }
    }

    /// Session area sharing this area's items until either side writes
    pub fn copy(&self) -> Self {
        debug_assert_eq!(self.kind, StorageType::Session, "only session areas are copied");
        let map = read(&self.map).clone();
        Self {
            kind: self.kind,
            origin: self.origin.clone(),
            map: Arc::new(RwLock::new(map)),
            sync: None,
            events: self.events.clone(),
            is_shutdown: AtomicBool::new(false),
        }
    }

    fn dispatch(&self, key: Option<&str>, old_value: Option<String>, new_value: Option<String>, source: SourceId) {
        let Some(events) = &self.events else {
            return;
        };
        events.dispatch(&StorageEvent {
            kind: self.kind,
            origin: self.origin.clone(),
            key: key.map(str::to_string),
            old_value,
            new_value,
            source,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<StorageEvent>>,
    }

    impl StorageEventSink for RecordingSink {
        fn dispatch(&self, event: &StorageEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn session_area(quota: usize) -> (StorageArea, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let origin = SecurityOrigin::parse("https://example.com").unwrap();
        let area = StorageArea::session(origin, quota, Some(sink.clone() as Arc<dyn StorageEventSink>));
        (area, sink)
    }

    #[test]
    fn test_set_fires_event() {
        let (area, sink) = session_area(1024);
        area.set_item("k", "v", SourceId(7)).unwrap();
        area.set_item("k", "w", SourceId(7)).unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].key.as_deref(), Some("k"));
        assert_eq!(events[1].old_value.as_deref(), Some("v"));
        assert_eq!(events[1].new_value.as_deref(), Some("w"));
        assert_eq!(events[1].source, SourceId(7));
        assert_eq!(events[1].kind, StorageType::Session);
    }

    #[test]
    fn test_unchanged_value_is_silent() {
        let (area, sink) = session_area(1024);
        area.set_item("k", "v", SourceId(1)).unwrap();
        area.set_item("k", "v", SourceId(1)).unwrap();
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_quota_error_is_silent() {
        let (area, sink) = session_area(10);
        area.set_item("ab", "cd", SourceId(1)).unwrap();
        let result = area.set_item("ab", "cdef", SourceId(1));
        assert!(matches!(result, Err(StorageError::QuotaExceeded { .. })));
        assert_eq!(area.get_item("ab").as_deref(), Some("cd"));
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let (area, sink) = session_area(1024);
        area.remove_item("missing", SourceId(1));
        area.clear(SourceId(1));
        assert!(sink.events.lock().unwrap().is_empty());

        area.set_item("a", "1", SourceId(1)).unwrap();
        area.set_item("b", "2", SourceId(1)).unwrap();
        area.remove_item("a", SourceId(1));
        assert_eq!(area.length(), 1);
        assert_eq!(area.key(0).as_deref(), Some("b"));

        area.clear(SourceId(1));
        assert_eq!(area.length(), 0);
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].old_value.as_deref(), Some("1"));
        assert_eq!(events[2].new_value, None);
        assert!(events[3].is_clear());
    }

    #[test]
    fn test_copy_isolated() {
        let (area, _) = session_area(1024);
        area.set_item("k", "v", SourceId(1)).unwrap();
        let copy = area.copy();
        copy.set_item("k", "changed", SourceId(2)).unwrap();
        area.remove_item("k", SourceId(1));
        assert_eq!(copy.get_item("k").as_deref(), Some("changed"));
        assert!(!area.contains("k"));
    }

    #[test]
    fn test_readers_share_the_map() {
        let (area, _) = session_area(1024);
        area.set_item("k", "v", SourceId(1)).unwrap();

        // A reader holding the map does not stall other readers
        let held = area.map.read().unwrap();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    assert_eq!(area.get_item("k").as_deref(), Some("v"));
                    assert_eq!(area.length(), 1);
                    assert_eq!(area.key(0).as_deref(), Some("k"));
                });
            }
        });
        assert_eq!(held.get("k"), Some("v"));
    }

    #[test]
    fn test_clear_for_origin_deletion_is_silent() {
        let (area, sink) = session_area(1024);
        area.set_item("k", "v", SourceId(1)).unwrap();
        area.clear_for_origin_deletion();
        assert_eq!(area.length(), 0);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }
}
