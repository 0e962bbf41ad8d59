//! KvStore - synchronous string key-value stores
//!
//! The storage collaborator underneath a crosshub hub. Every store maps string
//! keys to raw string values and exposes the same small surface: probe, get,
//! set, remove, clear and enumerate. Stores that can observe mutations also
//! publish native change notifications over a tokio broadcast channel.
//!
//! # Stores
//!
//! - [`MemoryStore`] - in-process map, used by tests and embedded hubs
//! - [`FileStore`] - one JSON object file, re-read under an advisory lock on every call
//! - [`SharedStore`] - `Arc<Mutex<_>>` wrapper so several hubs share one physical store
//! - [`DisabledStore`] - always unavailable, stands in for blocked storage
//!
//! # Example
//!
//! ```ignore
//! use kvstore::{FileStore, KeyValueStore};
//!
//! let mut store = FileStore::open("/tmp/store.json")?;
//! store.set("greeting", "\"hello\"")?;
//! assert_eq!(store.get("greeting")?.as_deref(), Some("\"hello\""));
//! ```

pub mod cli;
pub mod config;
mod file;
mod memory;
mod shared;
mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use shared::{DisabledStore, SharedStore};
pub use store::{KeyValueStore, StoreChange, StoreError, StoreResult};

/// Capacity of the native change notification channel
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Key written and removed by [`KeyValueStore::probe`]
pub const PROBE_KEY: &str = "__kvstore_probe__";
