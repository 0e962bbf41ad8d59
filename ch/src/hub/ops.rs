//! Storage operations executed by the hub

use kvstore::{KeyValueStore, StoreError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::permissions::Method;
use crate::protocol::{KeysParams, SetParams};
use crate::ttl::{self, Decoded};

/// Operation-level failures; the display text is what goes on the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    #[error("Invalid permissions for {0}")]
    PermissionDenied(Method),

    #[error("ttl must be a number")]
    InvalidTtl,

    #[error("Can't reuse eventKeys")]
    EventKeyInUse,

    #[error("{0} is not supported")]
    Unsupported(Method),

    #[error("Invalid params for {method}: {reason}")]
    InvalidParams { method: Method, reason: String },

    #[error("{0}")]
    Storage(String),
}

impl From<StoreError> for OpError {
    fn from(e: StoreError) -> Self {
        OpError::Storage(e.to_string())
    }
}

pub type OpResult = Result<Option<Value>, OpError>;

/// Decode a method's params into its expected shape
pub fn params<T: DeserializeOwned>(method: Method, params: &Value) -> Result<T, OpError> {
    T::deserialize(params).map_err(|e| OpError::InvalidParams {
        method,
        reason: e.to_string(),
    })
}

/// Normalize a wire ttl: absent, null and zero mean no expiry
///
/// Integral floats such as `500.0` are accepted; anything else is rejected.
fn ttl_ms(ttl: Option<&Value>) -> Result<Option<i64>, OpError> {
    let Some(ttl) = ttl else {
        return Ok(None);
    };
    if ttl.is_null() {
        return Ok(None);
    }
    let ms = ttl
        .as_i64()
        .or_else(|| ttl.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64))
        .ok_or(OpError::InvalidTtl)?;
    Ok((ms != 0).then_some(ms))
}

pub fn set<S: KeyValueStore>(store: &mut S, raw: &Value, now: i64) -> OpResult {
    let SetParams { key, value, ttl } = params(Method::Set, raw)?;
    let ttl = ttl_ms(ttl.as_ref())?;
    debug!(%key, ?ttl, "ops::set: called");
    store.set(&key, &ttl::wrap(value, ttl, now))?;
    Ok(None)
}

/// Read each key, deleting expired items; one key yields the bare value
pub fn get<S: KeyValueStore>(store: &mut S, raw: &Value, now: i64) -> OpResult {
    let KeysParams { keys } = params(Method::Get, raw)?;
    debug!(count = keys.len(), "ops::get: called");

    let mut values = Vec::with_capacity(keys.len());
    for key in &keys {
        let value = match store.get(key)? {
            None => Value::Null,
            Some(stored) => match ttl::unwrap(&stored, now) {
                Decoded::Live(value) => value,
                Decoded::Expired => {
                    debug!(%key, "ops::get: removing expired item");
                    store.remove(key)?;
                    Value::Null
                }
                Decoded::Invalid => Value::Null,
            },
        };
        values.push(value);
    }

    if values.len() == 1 {
        Ok(values.pop())
    } else {
        Ok(Some(Value::Array(values)))
    }
}

pub fn del<S: KeyValueStore>(store: &mut S, raw: &Value) -> OpResult {
    let KeysParams { keys } = params(Method::Del, raw)?;
    debug!(count = keys.len(), "ops::del: called");
    for key in &keys {
        store.remove(key)?;
    }
    Ok(None)
}

pub fn clear<S: KeyValueStore>(store: &mut S) -> OpResult {
    debug!("ops::clear: called");
    store.clear()?;
    Ok(None)
}

pub fn get_keys<S: KeyValueStore>(store: &S) -> OpResult {
    let keys = store.keys()?;
    debug!(count = keys.len(), "ops::get_keys: called");
    Ok(Some(Value::from(keys)))
}
