//! Shared and disabled stores

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::store::{KeyValueStore, StoreChange, StoreError, StoreResult};

/// A store shared by several owners in one process
///
/// Cloning yields another handle onto the same physical store. Each call
/// holds the lock for its duration only, so operations from different
/// handles interleave at call granularity.
#[derive(Debug)]
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeyValueStore> SharedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, S>> {
        self.inner.lock().map_err(|_| StoreError::Lock)
    }
}

impl<S: KeyValueStore> KeyValueStore for SharedStore<S> {
    fn probe(&mut self) -> StoreResult<()> {
        self.lock()?.probe()
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.lock()?.get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?.set(key, value)
    }

    fn remove(&mut self, key: &str) -> StoreResult<()> {
        self.lock()?.remove(key)
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.lock()?.clear()
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.lock()?.keys()
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreChange>> {
        self.lock().ok()?.subscribe()
    }
}

/// A store whose every operation fails
///
/// Models storage that exists but cannot be used, such as a sandboxed
/// context or blocked third-party storage.
#[derive(Debug, Clone)]
pub struct DisabledStore {
    reason: String,
}

impl DisabledStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    fn fail<T>(&self) -> StoreResult<T> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}

impl Default for DisabledStore {
    fn default() -> Self {
        Self::new("storage is disabled")
    }
}

impl KeyValueStore for DisabledStore {
    fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        self.fail()
    }

    fn set(&mut self, _key: &str, _value: &str) -> StoreResult<()> {
        self.fail()
    }

    fn remove(&mut self, _key: &str) -> StoreResult<()> {
        self.fail()
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.fail()
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.fail()
    }
}
