//! Storage change notifications

use crate::SecurityOrigin;

/// Which storage a namespace or area backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// `localStorage`: persisted per origin
    Local,
    /// `sessionStorage`: per browsing context, memory only
    Session,
}

/// Identifies the document that made a change so it is not notified of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceId(pub u64);

/// A change to one storage area
///
/// A clear carries `None` for the key and both values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub kind: StorageType,
    pub origin: SecurityOrigin,
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Document to exclude from delivery
    pub source: SourceId,
}

impl StorageEvent {
    pub fn is_clear(&self) -> bool {
        self.key.is_none()
    }
}

/// Receiver of storage events, implemented by the embedder
pub trait StorageEventSink: Send + Sync {
    fn dispatch(&self, event: &StorageEvent);
}
