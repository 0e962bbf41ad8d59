//! Stored item codec with optional expiration
//!
//! Values are persisted as `{"value": <any>, "expireAt": <epoch ms>}` with
//! `expireAt` omitted for items that never expire. Expiry is checked lazily
//! when an item is read.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Persisted shape of a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<i64>,
}

impl StoredItem {
    /// An item is expired once `now >= expireAt`
    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_at.is_some_and(|expire_at| now >= expire_at)
    }
}

/// Result of decoding a raw stored value
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Live(Value),
    Expired,
    Invalid,
}

/// Wrap a value for storage, stamping `expireAt = now + ttl` when a ttl is given
pub fn wrap(value: Value, ttl_ms: Option<i64>, now: i64) -> String {
    let item = StoredItem {
        value,
        expire_at: ttl_ms.map(|ttl| now.saturating_add(ttl)),
    };
    // StoredItem holds only a Value and an integer, which always serialize
    serde_json::to_string(&item).unwrap_or_else(|_| "{\"value\":null}".to_string())
}

/// Decode a raw stored value, honoring expiry
pub fn unwrap(raw: &str, now: i64) -> Decoded {
    match serde_json::from_str::<StoredItem>(raw) {
        Ok(item) if item.is_expired(now) => Decoded::Expired,
        Ok(item) => Decoded::Live(item.value),
        Err(_) => Decoded::Invalid,
    }
}

/// Value of a raw stored item regardless of expiry; null when undecodable
pub fn peek(raw: Option<&str>) -> Value {
    raw.and_then(|raw| serde_json::from_str::<StoredItem>(raw).ok())
        .map(|item| item.value)
        .unwrap_or(Value::Null)
}
