//! Wire payloads exchanged between client and hub
//!
//! Structured payloads are JSON objects. Control signals are bare strings
//! (`poll`, `ready`, `unavailable`) so they can never be confused with an
//! envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::permissions::Method;

/// Client asks an already-running hub to repeat its ready signal
pub const POLL: &str = "poll";

/// Hub is installed and accepting requests
pub const READY: &str = "ready";

/// Hub could not access its store and did not install
pub const UNAVAILABLE: &str = "unavailable";

/// Bare control signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    Poll,
    Ready,
    Unavailable,
}

impl ControlToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlToken::Poll => POLL,
            ControlToken::Ready => READY,
            ControlToken::Unavailable => UNAVAILABLE,
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        match data {
            POLL => Some(ControlToken::Poll),
            READY => Some(ControlToken::Ready),
            UNAVAILABLE => Some(ControlToken::Unavailable),
            _ => None,
        }
    }
}

/// Client to hub request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub method: Method,
    #[serde(default)]
    pub params: Value,
}

/// Hub to client reply, correlated by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ResponseEnvelope {
    pub fn success(id: impl Into<String>, result: Option<Value>) -> Self {
        Self {
            id: id.into(),
            error: None,
            result,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: Some(error.into()),
            result: None,
        }
    }
}

/// Hub to host push for a registered `listen` event key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotice {
    pub event_key: String,
    /// Changed key, `None` when the store was cleared
    pub key: Option<String>,
    #[serde(default)]
    pub old_value: Value,
    #[serde(default)]
    pub new_value: Value,
}

/// Classification of an inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlToken),
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Change(ChangeNotice),
    Malformed,
}

impl Inbound {
    /// Classify a raw payload; anything unrecognizable is [`Inbound::Malformed`]
    pub fn parse(data: &str) -> Self {
        if let Some(token) = ControlToken::parse(data) {
            return Inbound::Control(token);
        }

        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return Inbound::Malformed;
        };
        let Some(object) = value.as_object() else {
            return Inbound::Malformed;
        };

        let parsed = if object.contains_key("method") {
            serde_json::from_value(value).map(Inbound::Request)
        } else if object.contains_key("eventKey") {
            serde_json::from_value(value).map(Inbound::Change)
        } else {
            serde_json::from_value(value).map(Inbound::Response)
        };
        parsed.unwrap_or(Inbound::Malformed)
    }
}

/// Params for `set`
#[derive(Debug, Clone, Deserialize)]
pub struct SetParams {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub ttl: Option<Value>,
}

/// Params for `get` and `del`
#[derive(Debug, Clone, Deserialize)]
pub struct KeysParams {
    pub keys: Vec<String>,
}

/// Params for `listen` and `unlisten`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenParams {
    pub event_key: String,
}
