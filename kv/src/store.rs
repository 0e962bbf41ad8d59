//! Store trait, change notifications and errors

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store file: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Lock,
}

/// Result of a store operation
pub type StoreResult<T> = Result<T, StoreError>;

/// A native change notification
///
/// `key` is `None` when the whole store was cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreChange {
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl StoreChange {
    pub fn write(key: &str, old_value: Option<String>, new_value: Option<String>) -> Self {
        Self {
            key: Some(key.to_string()),
            old_value,
            new_value,
        }
    }

    pub fn cleared() -> Self {
        Self {
            key: None,
            old_value: None,
            new_value: None,
        }
    }
}

/// Synchronous string key-value storage
///
/// Reads take `&self`; writes take `&mut self`. Implementations never
/// interpret values, callers own the encoding.
pub trait KeyValueStore: Send + 'static {
    /// Check that the store can actually be written
    ///
    /// The default writes and removes [`crate::PROBE_KEY`].
    fn probe(&mut self) -> StoreResult<()> {
        self.set(crate::PROBE_KEY, "1")?;
        self.remove(crate::PROBE_KEY)
    }

    /// Read the raw value for a key
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write the raw value for a key, replacing any previous value
    fn set(&mut self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a key; removing an absent key is not an error
    fn remove(&mut self, key: &str) -> StoreResult<()>;

    /// Remove every key in the store
    fn clear(&mut self) -> StoreResult<()>;

    /// Snapshot of every key currently in the store
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Subscribe to native change notifications, if the store has any
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreChange>> {
        None
    }
}

/// Publish a change, ignoring the no-subscriber case
pub(crate) fn publish(tx: &broadcast::Sender<StoreChange>, change: StoreChange) {
    if change.key.as_deref() == Some(crate::PROBE_KEY) {
        return;
    }
    if change.key.is_some() && change.old_value == change.new_value {
        return;
    }
    let _ = tx.send(change);
}
