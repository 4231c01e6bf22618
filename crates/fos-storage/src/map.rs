//! Copy-on-write storage map
//!
//! Cloning a [`StorageMap`] shares its items. The first mutation through a
//! shared handle copies them, so other handles keep their snapshot.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{Result, StorageError};

/// Quota value meaning "no limit"
pub const NO_QUOTA: usize = usize::MAX;

#[derive(Debug, Clone, Default)]
struct MapData {
    items: IndexMap<String, String>,
    /// Sum of key and value lengths in UTF-16 code units
    current_length: usize,
}

/// Key/value items of one storage area
#[derive(Debug, Clone)]
pub struct StorageMap {
    data: Arc<MapData>,
    /// Bytes; each UTF-16 code unit costs two
    quota: usize,
}

/// Length as the scripting layer sees it
fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

impl StorageMap {
    pub fn new(quota: usize) -> Self {
        Self {
            data: Arc::new(MapData::default()),
            quota,
        }
    }

    /// Map without a quota
    pub fn unlimited() -> Self {
        Self::new(NO_QUOTA)
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.data.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.items.is_empty()
    }

    /// Stored size in UTF-16 code units
    pub fn length_in_code_units(&self) -> usize {
        self.data.current_length
    }

    /// Stored size in bytes as counted against the quota
    pub fn length_in_bytes(&self) -> usize {
        self.data.current_length.saturating_mul(2)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.items.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.items.contains_key(key)
    }

    /// Key at enumeration position `index`
    ///
    /// Positions follow insertion order and shift down when an earlier key
    /// is removed.
    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.data.items.get_index(index).map(|(key, _)| key.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.items.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Insert or replace `key`, returning the previous value
    ///
    /// Fails with [`StorageError::QuotaExceeded`] without touching the map
    /// if the new total would not fit.
    pub fn set(&mut self, key: &str, value: &str) -> Result<Option<String>> {
        let old_length = self.get(key).map(utf16_len);
        let key_length = if old_length.is_none() { utf16_len(key) } else { 0 };

        let new_length = self
            .data
            .current_length
            .checked_add(utf16_len(value))
            .map(|length| length - old_length.unwrap_or(0))
            .and_then(|length| length.checked_add(key_length));
        // Unreachable while the quota holds
        debug_assert!(new_length.is_some() || self.quota == NO_QUOTA, "storage length overflow");

        // Quota is in bytes, lengths in code units
        if self.quota != NO_QUOTA && new_length.is_none_or(|length| length > self.quota / 2) {
            return Err(StorageError::QuotaExceeded {
                quota: self.quota,
                requested: new_length.map_or(usize::MAX, |length| length.saturating_mul(2)),
            });
        }

        let data = Arc::make_mut(&mut self.data);
        let old = data.items.insert(key.to_string(), value.to_string());
        data.current_length = new_length.unwrap_or(usize::MAX);
        Ok(old)
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        if !self.contains(key) {
            return None;
        }
        let data = Arc::make_mut(&mut self.data);
        let old = data.items.shift_remove(key)?;
        data.current_length = data.current_length.saturating_sub(utf16_len(key) + utf16_len(&old));
        Some(old)
    }

    /// Load rows read from disk
    ///
    /// Skips the quota check: the rows were accepted when first written.
    pub fn import_batch<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let data = Arc::make_mut(&mut self.data);
        for (key, value) in items {
            let added = utf16_len(&value);
            match data.items.insert(key, value) {
                Some(old) => {
                    data.current_length = data.current_length.saturating_sub(utf16_len(&old)).saturating_add(added);
                }
                None => {
                    let key_length = data.items.last().map_or(0, |(key, _)| utf16_len(key));
                    data.current_length = data.current_length.saturating_add(key_length + added);
                }
            }
        }
    }

    /// Independent copy of the items
    pub fn clone_for_write(&self) -> Self {
        Self {
            data: Arc::new(MapData::clone(&self.data)),
            quota: self.quota,
        }
    }

    /// Whether another handle shares these items
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }
}

impl Default for StorageMap {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let mut map = StorageMap::unlimited();
        assert_eq!(map.set("a", "1").unwrap(), None);
        assert_eq!(map.set("a", "22").unwrap(), Some("1".to_string()));
        assert_eq!(map.get("a"), Some("22"));
        assert_eq!(map.length_in_code_units(), 3);
        assert_eq!(map.remove("a"), Some("22".to_string()));
        assert_eq!(map.remove("a"), None);
        assert_eq!(map.length_in_code_units(), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_quota_scenario() {
        let mut map = StorageMap::new(10);
        map.set("ab", "cd").unwrap();
        assert_eq!(map.length_in_bytes(), 8);

        let result = map.set("ab", "cdef");
        assert!(matches!(result, Err(StorageError::QuotaExceeded { quota: 10, requested: 12 })));
        assert_eq!(map.get("ab"), Some("cd"));
        assert_eq!(map.length_in_bytes(), 8);
    }

    #[test]
    fn test_quota_counts_utf16() {
        // U+1F600 is two code units
        let mut map = StorageMap::new(8);
        map.set("k", "\u{1F600}").unwrap();
        assert_eq!(map.length_in_code_units(), 3);
        assert!(map.set("k2", "x").is_err());
    }

    #[test]
    fn test_replace_does_not_recount_key() {
        let mut map = StorageMap::new(8);
        map.set("ab", "cd").unwrap();
        map.set("ab", "ef").unwrap();
        assert_eq!(map.length_in_code_units(), 4);
    }

    #[test]
    fn test_copy_on_write() {
        let mut map = StorageMap::unlimited();
        map.set("a", "1").unwrap();
        let snapshot = map.clone();
        assert!(map.is_shared());

        map.set("a", "2").unwrap();
        map.set("b", "3").unwrap();
        assert!(!map.is_shared());
        assert_eq!(snapshot.get("a"), Some("1"));
        assert_eq!(snapshot.get("b"), None);
        assert_eq!(map.get("a"), Some("2"));
    }

    #[test]
    fn test_remove_missing_keeps_sharing() {
        let map = {
            let mut map = StorageMap::unlimited();
            map.set("a", "1").unwrap();
            map
        };
        let mut other = map.clone();
        assert_eq!(other.remove("missing"), None);
        assert!(other.is_shared());
    }

    #[test]
    fn test_clone_for_write() {
        let mut map = StorageMap::unlimited();
        map.set("a", "1").unwrap();
        let copy = map.clone_for_write();
        assert!(!map.is_shared());
        assert_eq!(copy.get("a"), Some("1"));
    }

    #[test]
    fn test_key_at_tracks_removals() {
        let mut map = StorageMap::unlimited();
        for key in ["a", "b", "c"] {
            map.set(key, "v").unwrap();
        }
        assert_eq!(map.key_at(1), Some("b"));
        map.remove("a");
        assert_eq!(map.key_at(0), Some("b"));
        assert_eq!(map.key_at(1), Some("c"));
        assert_eq!(map.key_at(2), None);
        map.set("d", "v").unwrap();
        assert_eq!(map.key_at(2), Some("d"));
    }

    #[test]
    fn test_import_batch_bypasses_quota() {
        let mut map = StorageMap::new(4);
        map.import_batch(vec![("key".to_string(), "value".to_string()), ("key".to_string(), "v".to_string())]);
        assert_eq!(map.get("key"), Some("v"));
        assert_eq!(map.length_in_code_units(), 4);
        assert!(map.set("x", "y").is_err());
    }
}
