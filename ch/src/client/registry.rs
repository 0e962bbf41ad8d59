//! Pending request registry
//!
//! Tracks every request between send and settle. An entry is consumed by
//! whichever of its response or its timeout reaches the registry first; the
//! other finds nothing and is a no-op.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ClientError, ClientResult};
use crate::permissions::Method;
use crate::protocol::ResponseEnvelope;

/// A request awaiting its response
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub method: Method,
    pub reply: oneshot::Sender<ClientResult<Value>>,
    pub timer: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct Registry {
    client_id: String,
    counter: u64,
    pending: HashMap<String, PendingRequest>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            client_id: Uuid::now_v7().to_string(),
            counter: 0,
            pending: HashMap::new(),
        }
    }

    /// Next request id; ids never repeat for the lifetime of the client
    pub fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}:{}", self.client_id, self.counter)
    }

    pub fn insert(&mut self, id: String, request: PendingRequest) {
        self.pending.insert(id, request);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Settle the matching request from a hub response
    ///
    /// Returns false for unknown ids (stale, duplicate or late responses).
    pub fn settle(&mut self, response: ResponseEnvelope) -> bool {
        let Some(pending) = self.pending.remove(&response.id) else {
            debug!(id = %response.id, "Registry::settle: no pending request, dropping response");
            return false;
        };
        pending.timer.abort();

        let outcome = match response.error {
            Some(error) => Err(ClientError::Remote(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        debug!(id = %response.id, method = %pending.method, ok = outcome.is_ok(), "Registry::settle: settled");
        let _ = pending.reply.send(outcome);
        true
    }

    /// Fail the request with a timeout if it is still pending
    pub fn expire(&mut self, id: &str) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        warn!(%id, method = %pending.method, "Request timed out");
        let _ = pending.reply.send(Err(ClientError::Timeout(pending.method)));
        true
    }

    /// Fail the request locally, e.g. when it could not be sent
    pub fn fail(&mut self, id: &str, error: ClientError) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        pending.timer.abort();
        let _ = pending.reply.send(Err(error));
        true
    }
}
