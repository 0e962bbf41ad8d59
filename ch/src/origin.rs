//! Origins and post targets

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Serialization of an opaque origin (e.g. `file:` contexts)
pub const NULL_ORIGIN: &str = "null";

/// Wildcard target that delivers to any receiver
pub const ANY_TARGET: &str = "*";

#[derive(Debug, Error)]
#[error("Invalid url {url}: {source}")]
pub struct OriginError {
    url: String,
    #[source]
    source: url::ParseError,
}

/// Scheme + host (+ non-default port) identifying a context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    /// Derive the origin of a url, dropping path, query and default ports
    ///
    /// `https://www.example.com:443/app?x=1` becomes `https://www.example.com`.
    /// Urls without a tuple origin (`file:`, `data:`) yield [`NULL_ORIGIN`].
    pub fn from_url(url: &str) -> Result<Self, OriginError> {
        let parsed = Url::parse(url).map_err(|source| OriginError {
            url: url.to_string(),
            source,
        })?;
        Ok(Self(parsed.origin().ascii_serialization()))
    }

    /// Wrap an already-serialized origin as reported by a transport
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    pub fn null() -> Self {
        Self(NULL_ORIGIN.to_string())
    }

    /// True for the synthetic no-origin value
    pub fn is_null(&self) -> bool {
        self.0 == NULL_ORIGIN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Target that reaches this origin; the null origin is not addressable
    pub fn reply_target(&self) -> TargetOrigin {
        if self.is_null() {
            TargetOrigin::Any
        } else {
            TargetOrigin::Exact(self.clone())
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a posted message may be delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetOrigin {
    Any,
    Exact(Origin),
}

impl TargetOrigin {
    /// Whether a receiver at `origin` may see a message sent to this target
    pub fn accepts(&self, origin: &Origin) -> bool {
        match self {
            TargetOrigin::Any => true,
            TargetOrigin::Exact(target) => target == origin,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TargetOrigin::Any => ANY_TARGET,
            TargetOrigin::Exact(origin) => origin.as_str(),
        }
    }
}

impl From<String> for TargetOrigin {
    fn from(value: String) -> Self {
        if value == ANY_TARGET {
            TargetOrigin::Any
        } else {
            TargetOrigin::Exact(Origin(value))
        }
    }
}

impl From<TargetOrigin> for String {
    fn from(value: TargetOrigin) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
