//! File-backed store
//!
//! The whole store is one JSON object (`{"key": "raw value", ...}`). Each call
//! opens the file under an advisory lock (shared for reads, exclusive for
//! mutations) and, for mutations, rewrites the map before unlocking. Separate handles on the same
//! file therefore see each other's writes; concurrent writers are last-write-wins.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::sync::broadcast;
use tracing::debug;

use crate::store::{KeyValueStore, StoreChange, StoreError, StoreResult, publish};

type Entries = BTreeMap<String, String>;

/// Key-value store persisted to a single JSON file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    /// Open a store at the given path, creating parent directories
    ///
    /// The file itself is created lazily on the first write.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        debug!(?path, "FileStore::open: opened store");
        let (changes, _) = broadcast::channel(crate::CHANGE_CHANNEL_CAPACITY);
        Ok(Self { path, changes })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StoreResult<Entries> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let entries = decode(&mut file);
        file.unlock()?;
        entries
    }

    /// Run a mutation against the current entries under an exclusive lock
    fn mutate<R>(&self, apply: impl FnOnce(&mut Entries) -> R) -> StoreResult<R> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = rewrite(&mut file, apply);
        file.unlock()?;
        result
    }
}

fn rewrite<R>(file: &mut File, apply: impl FnOnce(&mut Entries) -> R) -> StoreResult<R> {
    let mut entries = decode(file)?;
    let out = apply(&mut entries);
    let json = serde_json::to_string(&entries).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.sync_data()?;
    Ok(out)
}

fn decode(file: &mut File) -> StoreResult<Entries> {
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    if content.trim().is_empty() {
        return Ok(Entries::new());
    }
    serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        debug!(%key, path = ?self.path, "FileStore::set: called");
        let old = self.mutate(|entries| entries.insert(key.to_string(), value.to_string()))?;
        publish(&self.changes, StoreChange::write(key, old, Some(value.to_string())));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> StoreResult<()> {
        debug!(%key, path = ?self.path, "FileStore::remove: called");
        if let Some(old) = self.mutate(|entries| entries.remove(key))? {
            publish(&self.changes, StoreChange::write(key, Some(old), None));
        }
        Ok(())
    }

    fn clear(&mut self) -> StoreResult<()> {
        debug!(path = ?self.path, "FileStore::clear: called");
        self.mutate(|entries| entries.clear())?;
        publish(&self.changes, StoreChange::cleared());
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.read_entries()?.into_keys().collect())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreChange>> {
        Some(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("store.json");
        let store = FileStore::open(&path).unwrap();
        assert!(path.parent().unwrap().exists());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_values_persist_across_handles() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");

        let mut first = FileStore::open(&path).unwrap();
        first.set("a", r#"{"value":1}"#).unwrap();

        let mut second = FileStore::open(&path).unwrap();
        assert_eq!(second.get("a").unwrap().as_deref(), Some(r#"{"value":1}"#));

        second.set("a", r#"{"value":2}"#).unwrap();
        assert_eq!(first.get("a").unwrap().as_deref(), Some(r#"{"value":2}"#));
    }

    #[test]
    fn test_remove_and_clear() {
        let temp = TempDir::new().unwrap();
        let mut store = FileStore::open(temp.path().join("store.json")).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();

        store.remove("a").unwrap();
        store.remove("never-set").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);

        store.clear().unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(matches!(store.get("a"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_probe_on_directory_fails() {
        let temp = TempDir::new().unwrap();
        let mut store = FileStore::open(temp.path()).unwrap();
        assert!(store.probe().is_err());
    }

    #[test]
    fn test_changes_published_for_this_handle() {
        let temp = TempDir::new().unwrap();
        let mut store = FileStore::open(temp.path().join("store.json")).unwrap();
        let mut rx = store.subscribe().unwrap();

        store.set("k", "v").unwrap();
        assert_eq!(rx.try_recv().unwrap(), StoreChange::write("k", None, Some("v".into())));
    }
}
