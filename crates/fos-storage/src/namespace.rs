//! Storage namespaces
//!
//! A namespace hands out one [`StorageArea`] per origin. The local
//! namespace persists through a [`StorageSyncManager`]; session namespaces
//! live in memory and are copied when a browsing context is duplicated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    lock, SecurityOrigin, StorageArea, StorageAreaSync, StorageConfig, StorageEventSink, StorageSyncManager,
    StorageThread, StorageTracker, StorageType,
};

pub struct StorageNamespace {
    kind: StorageType,
    quota: usize,
    areas: Mutex<HashMap<SecurityOrigin, Arc<StorageArea>>>,
    sync_manager: Option<Arc<StorageSyncManager>>,
    tracker: Option<Arc<StorageTracker>>,
    events: Option<Arc<dyn StorageEventSink>>,
    is_shutdown: AtomicBool,
}

impl std::fmt::Debug for StorageNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNamespace")
            .field("kind", &self.kind)
            .field("quota", &self.quota)
            .field("areas", &lock(&self.areas).len())
            .field("is_shutdown", &self.is_shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageNamespace {
    /// Persistent namespace stored under `config.directory`
    pub fn local(
        config: &StorageConfig,
        thread: Arc<StorageThread>,
        tracker: Option<Arc<StorageTracker>>,
        events: Option<Arc<dyn StorageEventSink>>,
    ) -> Arc<Self> {
        let namespace = Arc::new(Self {
            kind: StorageType::Local,
            quota: config.quota,
            areas: Mutex::new(HashMap::new()),
            sync_manager: Some(StorageSyncManager::new(config, thread)),
            tracker,
            events,
            is_shutdown: AtomicBool::new(false),
        });
        if let Some(tracker) = &namespace.tracker {
            tracker.register_namespace(&namespace);
        }
        namespace
    }

    /// In-memory namespace for one browsing context
    pub fn session(quota: usize, events: Option<Arc<dyn StorageEventSink>>) -> Arc<Self> {
        Arc::new(Self {
            kind: StorageType::Session,
            quota,
            areas: Mutex::new(HashMap::new()),
            sync_manager: None,
            tracker: None,
            events,
            is_shutdown: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> StorageType {
        self.kind
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn sync_manager(&self) -> Option<&Arc<StorageSyncManager>> {
        self.sync_manager.as_ref()
    }

    /// Area for `origin`, created on first use
    pub fn storage_area(&self, origin: &SecurityOrigin) -> Arc<StorageArea> {
        debug_assert!(!self.is_shutdown.load(Ordering::SeqCst), "namespace used after close");
        let mut areas = lock(&self.areas);
        if let Some(area) = areas.get(origin) {
            return Arc::clone(area);
        }

        let area = match &self.sync_manager {
            Some(manager) => StorageArea::local(origin.clone(), self.quota, self.events.clone(), |map| {
                StorageAreaSync::new(
                    Arc::clone(manager),
                    self.tracker.clone(),
                    map,
                    origin.database_identifier(),
                )
            }),
            None => StorageArea::session(origin.clone(), self.quota, self.events.clone()),
        };
        let area = Arc::new(area);
        areas.insert(origin.clone(), Arc::clone(&area));
        area
    }

    /// Origins with a live area
    pub fn origins(&self) -> Vec<SecurityOrigin> {
        let mut origins: Vec<SecurityOrigin> = lock(&self.areas).keys().cloned().collect();
        origins.sort();
        origins
    }

    fn areas(&self) -> Vec<Arc<StorageArea>> {
        lock(&self.areas).values().cloned().collect()
    }

    /// Session namespace whose areas share this one's items until written
    pub fn copy(&self) -> Arc<Self> {
        debug_assert_eq!(self.kind, StorageType::Session, "only session namespaces are copied");
        let areas = lock(&self.areas)
            .iter()
            .map(|(origin, area)| (origin.clone(), Arc::new(area.copy())))
            .collect();
        Arc::new(Self {
            kind: self.kind,
            quota: self.quota,
            areas: Mutex::new(areas),
            sync_manager: None,
            tracker: None,
            events: self.events.clone(),
            is_shutdown: AtomicBool::new(false),
        })
    }

    /// Final-sync every area and wait for the writes to reach disk
    pub fn close(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        for area in self.areas() {
            area.close();
        }
        if let Some(manager) = &self.sync_manager {
            manager.close();
        }
    }

    /// Flush pending writes of every area now
    pub fn sync(&self) {
        for area in self.areas() {
            area.sync();
        }
    }

    pub fn clear_origin_for_deletion(&self, origin: &SecurityOrigin) {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return;
        }
        let area = lock(&self.areas).get(origin).cloned();
        if let Some(area) = area {
            area.clear_for_origin_deletion();
        }
    }

    pub fn clear_all_origins_for_deletion(&self) {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return;
        }
        for area in self.areas() {
            area.clear_for_origin_deletion();
        }
    }
}
