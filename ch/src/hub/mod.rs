//! Hub - the privileged endpoint that owns the store
//!
//! A [`Hub`] checks each inbound request's origin against its
//! [`PermissionTable`], runs the operation against its store and replies to the
//! requester with a [`ResponseEnvelope`] carrying the same id. Handling one
//! message is synchronous, so no operation is ever observed half-done.
//!
//! [`init`] probes the store first. A hub whose store is inaccessible sends a
//! best-effort `unavailable` notice and never starts listening.

use std::sync::Arc;

use kvstore::{KeyValueStore, StoreChange, StoreError};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::origin::{Origin, TargetOrigin};
use crate::permissions::{Method, PermissionTable};
use crate::protocol::{ControlToken, Inbound, ListenParams, RequestEnvelope, ResponseEnvelope};
use crate::transport::{Message, Port};
use crate::ttl::{Clock, SystemClock};

pub mod listeners;
pub mod ops;

pub use listeners::Listeners;
pub use ops::OpError;

/// A payload the hub wants posted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub data: String,
    pub target: TargetOrigin,
}

/// Result of [`init`]
#[derive(Debug)]
pub enum HubStatus {
    /// Listening; the handle completes when the channel closes
    Running(JoinHandle<()>),
    /// Store inaccessible; nothing was installed
    Unavailable(StoreError),
}

/// Request dispatcher over one store
pub struct Hub<S> {
    store: S,
    permissions: PermissionTable,
    clock: Arc<dyn Clock>,
    listeners: Option<Listeners>,
}

impl<S: KeyValueStore> Hub<S> {
    /// Hub with the wall clock and the listen capability enabled
    pub fn new(store: S, permissions: PermissionTable) -> Self {
        debug!(entries = permissions.entries().len(), "Hub::new: called");
        Self {
            store,
            permissions,
            clock: Arc::new(SystemClock),
            listeners: Some(Listeners::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Drop the listen capability; listen/unlisten then fail as unsupported
    pub fn without_listeners(mut self) -> Self {
        self.listeners = None;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Handle one inbound message, returning the reply to post if any
    pub fn handle(&mut self, message: &Message) -> Option<Outbound> {
        let request = match Inbound::parse(&message.data) {
            Inbound::Control(ControlToken::Poll) => {
                debug!(origin = %message.origin, "Hub::handle: answering poll");
                return Some(Outbound {
                    data: ControlToken::Ready.as_str().to_string(),
                    target: message.origin.reply_target(),
                });
            }
            Inbound::Request(request) => request,
            // our own ready echo, responses, notices and garbage: sender is untrusted, stay silent
            _ => {
                debug!(origin = %message.origin, "Hub::handle: ignoring non-request payload");
                return None;
            }
        };

        let response = self.respond(&message.origin, request);
        match serde_json::to_string(&response) {
            Ok(data) => Some(Outbound {
                data,
                target: message.origin.reply_target(),
            }),
            Err(e) => {
                warn!(error = %e, id = %response.id, "Hub::handle: failed to serialize response");
                None
            }
        }
    }

    fn respond(&mut self, origin: &Origin, request: RequestEnvelope) -> ResponseEnvelope {
        let RequestEnvelope { id, method, params } = request;
        debug!(%id, %method, %origin, "Hub::respond: called");

        let outcome = if self.permissions.is_allowed(origin, method) {
            self.execute(origin, method, &params)
        } else {
            debug!(%id, %method, %origin, "Hub::respond: permission denied");
            Err(OpError::PermissionDenied(method))
        };

        match outcome {
            Ok(result) => ResponseEnvelope::success(id, result),
            Err(e) => ResponseEnvelope::failure(id, e.to_string()),
        }
    }

    fn execute(&mut self, origin: &Origin, method: Method, params: &Value) -> ops::OpResult {
        let now = self.clock.now_ms();
        match method {
            Method::Get => ops::get(&mut self.store, params, now),
            Method::Set => ops::set(&mut self.store, params, now),
            Method::Del => ops::del(&mut self.store, params),
            Method::Clear => ops::clear(&mut self.store),
            Method::GetKeys => ops::get_keys(&self.store),
            Method::Listen => {
                let listeners = self.listeners.as_mut().ok_or(OpError::Unsupported(method))?;
                let ListenParams { event_key } = ops::params(method, params)?;
                listeners.listen(&event_key, origin)?;
                Ok(None)
            }
            Method::Unlisten => {
                let listeners = self.listeners.as_mut().ok_or(OpError::Unsupported(Method::Listen))?;
                let ListenParams { event_key } = ops::params(method, params)?;
                listeners.unlisten(&event_key, origin);
                Ok(None)
            }
        }
    }

    /// Notices to forward for a native store change
    pub fn forward_change(&self, change: &StoreChange) -> Vec<Outbound> {
        match &self.listeners {
            Some(listeners) if !listeners.is_empty() => listeners.notices(change),
            _ => Vec::new(),
        }
    }

    /// Announce readiness, then serve the port until it closes
    pub async fn run<P: Port>(mut self, mut port: P) {
        info!(origin = %port.origin(), "Hub started");
        let mut changes = self.store.subscribe();

        if let Err(e) = port.send(ControlToken::Ready.as_str().to_string(), &TargetOrigin::Any).await {
            warn!(error = %e, "Hub::run: failed to announce ready");
        }

        loop {
            tokio::select! {
                message = port.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if let Some(out) = self.handle(&message)
                        && let Err(e) = port.send(out.data, &out.target).await
                    {
                        warn!(error = %e, target = %out.target, "Hub::run: failed to send reply");
                    }
                }
                change = next_change(&mut changes) => {
                    let Some(change) = change else {
                        debug!("Hub::run: store change feed closed");
                        changes = None;
                        continue;
                    };
                    for out in self.forward_change(&change) {
                        if let Err(e) = port.send(out.data, &out.target).await {
                            warn!(error = %e, target = %out.target, "Hub::run: failed to forward change");
                        }
                    }
                }
            }
        }

        info!("Hub stopped");
    }
}

async fn next_change(changes: &mut Option<broadcast::Receiver<StoreChange>>) -> Option<StoreChange> {
    let Some(rx) = changes else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(change) => return Some(change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Hub: store change feed lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Install a hub on a port
///
/// Probes the store; when it is inaccessible a best-effort `unavailable` is
/// posted to any listener and the hub is not started.
pub async fn init<S, P>(mut hub: Hub<S>, port: P) -> HubStatus
where
    S: KeyValueStore,
    P: Port,
{
    if let Err(e) = hub.store_mut().probe() {
        warn!(error = %e, "Hub storage unavailable, not installing");
        if let Err(send_err) = port.send(ControlToken::Unavailable.as_str().to_string(), &TargetOrigin::Any).await {
            debug!(error = %send_err, "init: could not deliver unavailable notice");
        }
        return HubStatus::Unavailable(e);
    }

    HubStatus::Running(tokio::spawn(hub.run(port)))
}
