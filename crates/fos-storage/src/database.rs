//! Durable key/value tables
//!
//! One JSON file per table:
//!
//! ```json
//! { "version": 1, "table": "ItemTable", "rows": [["key", "value"], ...] }
//! ```
//!
//! Keys are unique; inserting an existing key replaces its value in place.
//! Every [`Transaction`] rewrites the whole file through a temp file and a
//! rename, so a crash leaves either the old or the new contents on disk.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Result, StorageError};

/// Current file format version
const FORMAT_VERSION: u64 = 1;

/// On-disk representation of a table
#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    version: u64,
    table: String,
    rows: Vec<(String, String)>,
}

/// How [`DurableTable::open`] treats a missing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Fail with `NotFound`
    OpenExisting,
    /// Create the file (and its directory) with no rows
    CreateIfMissing,
}

/// Open handle to a table file. Rows are held in memory.
#[derive(Debug)]
pub struct DurableTable {
    path: PathBuf,
    table: String,
    rows: IndexMap<String, String>,
}

impl DurableTable {
    /// Open table `table` stored at `path`
    pub fn open(path: impl Into<PathBuf>, table: &str, mode: OpenMode) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if mode == OpenMode::OpenExisting {
                return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} does not exist", path.display())).into());
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let rows = IndexMap::new();
            write_file(&path, table, &rows)?;
            return Ok(Self {
                path,
                table: table.to_string(),
                rows,
            });
        }

        let contents = fs::read_to_string(&path)?;
        let file: TableFile = serde_json::from_str(&contents)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?;
        if file.version != FORMAT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "{}: unsupported version {} (expected {FORMAT_VERSION})",
                path.display(),
                file.version
            )));
        }
        if file.table != table {
            return Err(StorageError::Corrupt(format!(
                "{}: holds table {}, expected {table}",
                path.display(),
                file.table
            )));
        }

        Ok(Self {
            path,
            table: file.table,
            rows: file.rows.into_iter().collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.rows.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in insertion order
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Begin a transaction. Changes are visible only after [`Transaction::commit`].
    pub fn transaction(&mut self) -> Transaction<'_> {
        let staged = self.rows.clone();
        Transaction { table: self, staged }
    }
}

/// Staged changes to a [`DurableTable`]
///
/// Dropping a transaction without committing discards it.
#[derive(Debug)]
pub struct Transaction<'t> {
    table: &'t mut DurableTable,
    staged: IndexMap<String, String>,
}

impl Transaction<'_> {
    /// Insert or replace a row
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.staged.insert(key.into(), value.into());
    }

    /// Delete a row, returning whether it existed
    pub fn delete(&mut self, key: &str) -> bool {
        self.staged.shift_remove(key).is_some()
    }

    /// Delete every row
    pub fn clear(&mut self) {
        self.staged.clear();
    }

    /// Rows after the staged changes
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Write the staged rows. On failure the table keeps its previous rows.
    pub fn commit(self) -> Result<()> {
        write_file(&self.table.path, &self.table.table, &self.staged)?;
        self.table.rows = self.staged;
        Ok(())
    }
}

/// Atomic write: temp file then rename
fn write_file(path: &Path, table: &str, rows: &IndexMap<String, String>) -> Result<()> {
    let file = TableFile {
        version: FORMAT_VERSION,
        table: table.to_string(),
        rows: rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    };
    let json = serde_json::to_string(&file).map_err(|e| StorageError::Corrupt(format!("failed to serialize {table}: {e}")))?;

    let mut temp = OsString::from(path.as_os_str());
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, json)?;
    fs::rename(&temp, path)?;
    Ok(())
}

/// Delete a table file. A file that is already gone is not an error.
pub fn remove_table_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_existing_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = DurableTable::open(dir.path().join("a.localstorage"), "ItemTable", OpenMode::OpenExisting);
        assert!(matches!(result, Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn test_create_makes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("a.localstorage");
        let table = DurableTable::open(&path, "ItemTable", OpenMode::CreateIfMissing).unwrap();
        assert!(table.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_commit_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.localstorage");
        let mut table = DurableTable::open(&path, "ItemTable", OpenMode::CreateIfMissing).unwrap();

        let mut tx = table.transaction();
        tx.insert("a", "1");
        tx.insert("b", "2");
        tx.insert("a", "3");
        assert!(tx.delete("b"));
        assert!(!tx.delete("missing"));
        tx.commit().unwrap();
        assert_eq!(table.get("a"), Some("3"));
        assert_eq!(table.len(), 1);

        let reopened = DurableTable::open(&path, "ItemTable", OpenMode::OpenExisting).unwrap();
        assert_eq!(reopened.rows().collect::<Vec<_>>(), vec![("a", "3")]);
    }

    #[test]
    fn test_uncommitted_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.localstorage");
        let mut table = DurableTable::open(&path, "ItemTable", OpenMode::CreateIfMissing).unwrap();
        {
            let mut tx = table.transaction();
            tx.insert("a", "1");
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_failed_commit_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let path = sub.join("a.localstorage");
        let mut table = DurableTable::open(&path, "ItemTable", OpenMode::CreateIfMissing).unwrap();
        let mut tx = table.transaction();
        tx.insert("a", "1");
        tx.commit().unwrap();

        fs::remove_dir_all(&sub).unwrap();
        let mut tx = table.transaction();
        tx.clear();
        tx.insert("b", "2");
        assert!(tx.commit().is_err());
        assert_eq!(table.rows().collect::<Vec<_>>(), vec![("a", "1")]);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.localstorage");
        fs::write(&path, "not json").unwrap();
        let result = DurableTable::open(&path, "ItemTable", OpenMode::OpenExisting);
        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_version_and_table_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.localstorage");
        fs::write(&path, r#"{"version":99,"table":"ItemTable","rows":[]}"#).unwrap();
        assert!(matches!(
            DurableTable::open(&path, "ItemTable", OpenMode::OpenExisting),
            Err(StorageError::Corrupt(_))
        ));

        fs::write(&path, r#"{"version":1,"table":"Origins","rows":[]}"#).unwrap();
        assert!(matches!(
            DurableTable::open(&path, "ItemTable", OpenMode::OpenExisting),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_remove_table_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.localstorage");
        DurableTable::open(&path, "ItemTable", OpenMode::CreateIfMissing).unwrap();
        remove_table_file(&path).unwrap();
        assert!(!path.exists());
        remove_table_file(&path).unwrap();
    }
}
