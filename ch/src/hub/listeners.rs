//! Change subscriptions for the `listen` capability
//!
//! Each event key belongs to the origin that registered it. Native store
//! changes are forwarded to every registered key's origin as a
//! [`ChangeNotice`] tagged with that key.

use std::collections::BTreeMap;

use kvstore::StoreChange;
use tracing::debug;

use super::Outbound;
use super::ops::OpError;
use crate::origin::Origin;
use crate::protocol::ChangeNotice;
use crate::ttl;

#[derive(Debug, Default)]
pub struct Listeners {
    subscriptions: BTreeMap<String, Origin>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event key for `origin`; keys are never shared or reused
    pub fn listen(&mut self, event_key: &str, origin: &Origin) -> Result<(), OpError> {
        if self.subscriptions.contains_key(event_key) {
            return Err(OpError::EventKeyInUse);
        }
        debug!(%event_key, %origin, "Listeners::listen: registered");
        self.subscriptions.insert(event_key.to_string(), origin.clone());
        Ok(())
    }

    /// Drop an event key owned by `origin`; returns whether anything was removed
    pub fn unlisten(&mut self, event_key: &str, origin: &Origin) -> bool {
        match self.subscriptions.get(event_key) {
            Some(owner) if owner == origin => {
                debug!(%event_key, %origin, "Listeners::unlisten: removed");
                self.subscriptions.remove(event_key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Notices to emit for one store change
    pub fn notices(&self, change: &StoreChange) -> Vec<Outbound> {
        self.subscriptions
            .iter()
            .filter_map(|(event_key, origin)| {
                let notice = ChangeNotice {
                    event_key: event_key.clone(),
                    key: change.key.clone(),
                    old_value: ttl::peek(change.old_value.as_deref()),
                    new_value: ttl::peek(change.new_value.as_deref()),
                };
                serde_json::to_string(&notice).ok().map(|data| Outbound {
                    data,
                    target: origin.reply_target(),
                })
            })
            .collect()
    }
}
