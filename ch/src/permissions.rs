//! Origin-based permission table
//!
//! An ordered list of `{origin, allow}` entries. A request is granted when any
//! entry's pattern matches the requesting origin and lists the method's
//! capability. There are no deny entries.
//!
//! Patterns match from the start of the origin, the start of the host, or a
//! label boundary inside the host. The scheme may be spelled out
//! (`https://app\.test$`) or left off, in which case any scheme matches.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::origin::Origin;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Invalid origin pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown method: {0}")]
    UnknownMethod(String),
}

/// Storage operations a hub can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Get,
    Set,
    Del,
    Clear,
    GetKeys,
    Listen,
    Unlisten,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Set,
        Method::Del,
        Method::Clear,
        Method::GetKeys,
        Method::Listen,
        Method::Unlisten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Set => "set",
            Method::Del => "del",
            Method::Clear => "clear",
            Method::GetKeys => "getKeys",
            Method::Listen => "listen",
            Method::Unlisten => "unlisten",
        }
    }

    /// Permission that grants this method; `unlisten` rides on `listen`
    pub fn capability(&self) -> Method {
        match self {
            Method::Unlisten => Method::Listen,
            other => *other,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| PermissionError::UnknownMethod(s.to_string()))
    }
}

/// On-disk shape of a permission entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPermissionEntry {
    #[serde(alias = "originPattern", alias = "origin-pattern")]
    origin: String,
    #[serde(alias = "allowMethods", alias = "allow-methods")]
    allow: Vec<Method>,
}

/// One origin pattern and the capabilities it grants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawPermissionEntry", into = "RawPermissionEntry")]
pub struct PermissionEntry {
    source: String,
    pattern: Regex,
    allow: BTreeSet<Method>,
}

impl PermissionEntry {
    /// Compile an entry
    ///
    /// A pattern may begin matching at the start of the origin, at the start
    /// of the host, or at any `.` inside the host. So `(www\.)?example\.com$`
    /// admits `www.example.com` but not `sub.example.com`, while
    /// `\.example\.com$` admits every subdomain.
    pub fn new(pattern: &str, allow: impl IntoIterator<Item = Method>) -> Result<Self, PermissionError> {
        let compiled = Regex::new(&format!("^(?:{pattern})")).map_err(|source| {
            PermissionError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self {
            source: pattern.to_string(),
            pattern: compiled,
            allow: allow.into_iter().map(|m| m.capability()).collect(),
        })
    }

    /// The pattern as written
    pub fn pattern(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, origin: &Origin) -> bool {
        let full = origin.as_str();
        let host = full.split_once("://").map_or(full, |(_, rest)| rest);
        self.pattern.is_match(full)
            || self.pattern.is_match(host)
            || host.match_indices('.').any(|(at, _)| self.pattern.is_match(&host[at..]))
    }

    pub fn allows(&self, method: Method) -> bool {
        self.allow.contains(&method.capability())
    }
}

impl TryFrom<RawPermissionEntry> for PermissionEntry {
    type Error = PermissionError;

    fn try_from(raw: RawPermissionEntry) -> Result<Self, Self::Error> {
        Self::new(&raw.origin, raw.allow)
    }
}

impl From<PermissionEntry> for RawPermissionEntry {
    fn from(entry: PermissionEntry) -> Self {
        Self {
            origin: entry.source,
            allow: entry.allow.into_iter().collect(),
        }
    }
}

/// Ordered set of permission entries, evaluated with OR semantics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionTable {
    entries: Vec<PermissionEntry>,
}

impl PermissionTable {
    pub fn new(entries: Vec<PermissionEntry>) -> Self {
        Self { entries }
    }

    /// Table granting every method to every origin
    pub fn allow_all() -> Result<Self, PermissionError> {
        Ok(Self::new(vec![PermissionEntry::new(".*", Method::ALL)?]))
    }

    pub fn entries(&self) -> &[PermissionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_allowed(&self, origin: &Origin, method: Method) -> bool {
        self.entries.iter().any(|e| e.allows(method) && e.matches(origin))
    }
}
