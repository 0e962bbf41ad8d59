//! In-process store

use std::collections::BTreeMap;

use tokio::sync::broadcast;
use tracing::debug;

use crate::store::{KeyValueStore, StoreChange, StoreResult, publish};

/// In-memory key-value store with native change notifications
#[derive(Debug)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(crate::CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: BTreeMap::new(),
            changes,
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        debug!(%key, "MemoryStore::set: called");
        let old = self.entries.insert(key.to_string(), value.to_string());
        publish(&self.changes, StoreChange::write(key, old, Some(value.to_string())));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> StoreResult<()> {
        debug!(%key, "MemoryStore::remove: called");
        if let Some(old) = self.entries.remove(key) {
            publish(&self.changes, StoreChange::write(key, Some(old), None));
        }
        Ok(())
    }

    fn clear(&mut self) -> StoreResult<()> {
        debug!(count = self.entries.len(), "MemoryStore::clear: called");
        self.entries.clear();
        publish(&self.changes, StoreChange::cleared());
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreChange>> {
        Some(self.changes.subscribe())
    }
}
