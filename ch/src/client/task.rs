//! Client task - owns the port, registry and connect waiters

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::registry::{PendingRequest, Registry};
use super::{ClientError, ClientResult, ClientShared};
use crate::origin::{Origin, TargetOrigin};
use crate::permissions::Method;
use crate::protocol::{ChangeNotice, ControlToken, Inbound, RequestEnvelope};
use crate::transport::{Message, Port};

/// Commands sent to the client task
#[derive(Debug)]
pub(crate) enum ClientCommand {
    Request {
        method: Method,
        params: Value,
        reply: oneshot::Sender<ClientResult<Value>>,
    },
    Timeout {
        id: String,
    },
    OnConnect {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    /// Replies false if the key already has a local route
    Subscribe {
        event_key: String,
        events: mpsc::Sender<ChangeNotice>,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        event_key: String,
    },
    Close,
}

pub(crate) struct ClientTask<P> {
    port: Option<P>,
    target: Origin,
    poll_on_start: bool,
    timeout: Duration,
    shared: Arc<ClientShared>,
    commands: mpsc::Receiver<ClientCommand>,
    timers: mpsc::WeakSender<ClientCommand>,
    registry: Registry,
    waiters: Vec<oneshot::Sender<ClientResult<()>>>,
    subscriptions: HashMap<String, mpsc::Sender<ChangeNotice>>,
    detached: bool,
}

impl<P: Port> ClientTask<P> {
    pub fn new(
        port: P,
        target: Origin,
        poll_on_start: bool,
        timeout: Duration,
        shared: Arc<ClientShared>,
        commands: mpsc::Receiver<ClientCommand>,
        timers: mpsc::WeakSender<ClientCommand>,
    ) -> Self {
        Self {
            port: Some(port),
            target,
            poll_on_start,
            timeout,
            shared,
            commands,
            timers,
            registry: Registry::new(),
            waiters: Vec::new(),
            subscriptions: HashMap::new(),
            detached: false,
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Run until every handle is gone, or until closed with nothing pending
    pub async fn run(mut self) {
        info!(target_origin = %self.target, "Client task started");

        if self.poll_on_start
            && let Some(port) = &self.port
            && let Err(e) = port.send(ControlToken::Poll.as_str().to_string(), &TargetOrigin::Exact(self.target.clone())).await
        {
            warn!(error = %e, "Client: failed to poll hub");
        }

        loop {
            if self.is_closed() && self.registry.is_empty() {
                break;
            }

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.on_command(command).await;
                }
                message = next_message(&mut self.port) => {
                    match message {
                        Some(message) => self.on_message(message),
                        None => {
                            debug!("Client: channel closed by peer");
                            self.port = None;
                        }
                    }
                }
            }
        }

        info!(target_origin = %self.target, "Client task stopped");
    }

    async fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Request { method, params, reply } => self.send_request(method, params, reply).await,
            ClientCommand::Timeout { id } => {
                self.registry.expire(&id);
            }
            ClientCommand::OnConnect { reply } => {
                if self.is_connected() {
                    let _ = reply.send(Ok(()));
                } else if self.is_closed() {
                    let _ = reply.send(Err(ClientError::Closed));
                } else {
                    self.waiters.push(reply);
                }
            }
            ClientCommand::Subscribe { event_key, events, reply } => {
                let fresh = !self.subscriptions.contains_key(&event_key);
                if fresh {
                    self.subscriptions.insert(event_key, events);
                }
                let _ = reply.send(fresh);
            }
            ClientCommand::Unsubscribe { event_key } => {
                self.subscriptions.remove(&event_key);
            }
            ClientCommand::Close => self.close(),
        }
    }

    async fn send_request(&mut self, method: Method, params: Value, reply: oneshot::Sender<ClientResult<Value>>) {
        if self.is_closed() {
            let _ = reply.send(Err(ClientError::Closed));
            return;
        }
        let Some(port) = &self.port else {
            let _ = reply.send(Err(ClientError::Transport("channel closed".to_string())));
            return;
        };

        let id = self.registry.next_id();
        let envelope = RequestEnvelope {
            id: id.clone(),
            method,
            params,
        };
        let data = match serde_json::to_string(&envelope) {
            Ok(data) => data,
            Err(e) => {
                let _ = reply.send(Err(ClientError::Serialization(e.to_string())));
                return;
            }
        };

        let timer = {
            let id = id.clone();
            let timers = self.timers.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(tx) = timers.upgrade() {
                    let _ = tx.send(ClientCommand::Timeout { id }).await;
                }
            })
        };
        self.registry.insert(id.clone(), PendingRequest { method, reply, timer });
        debug!(%id, %method, pending = self.registry.len(), "Client: sending request");

        if let Err(e) = port.send(data, &TargetOrigin::Exact(self.target.clone())).await {
            warn!(%id, error = %e, "Client: failed to send request");
            self.registry.fail(&id, ClientError::Transport(e.to_string()));
        }
    }

    fn on_message(&mut self, message: Message) {
        if message.origin != self.target {
            debug!(origin = %message.origin, "Client: dropping message from foreign origin");
            return;
        }

        let inbound = Inbound::parse(&message.data);

        if matches!(inbound, Inbound::Control(ControlToken::Unavailable)) {
            warn!(target_origin = %self.target, "Client: hub storage unavailable, closing");
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(ClientError::Unavailable));
            }
            self.close();
            return;
        }

        if self.shared.mark_connected() {
            info!(target_origin = %self.target, "Client connected");
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }

        match inbound {
            Inbound::Response(response) => {
                self.registry.settle(response);
            }
            Inbound::Change(notice) => self.deliver(notice),
            Inbound::Control(_) => {}
            Inbound::Request(_) | Inbound::Malformed => {
                debug!("Client: dropping unexpected payload");
            }
        }
    }

    fn deliver(&mut self, notice: ChangeNotice) {
        let Some(events) = self.subscriptions.get(&notice.event_key) else {
            debug!(event_key = %notice.event_key, "Client: no subscription for notice");
            return;
        };
        match events.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(notice)) => {
                warn!(event_key = %notice.event_key, "Client: subscriber lagging, dropping notice");
            }
            Err(mpsc::error::TrySendError::Closed(notice)) => {
                debug!(event_key = %notice.event_key, "Client: subscriber gone");
                self.subscriptions.remove(&notice.event_key);
            }
        }
    }

    /// Detach from the channel; requests in flight are left to their timeouts
    fn close(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        info!(target_origin = %self.target, pending = self.registry.len(), "Client closing");
        self.shared.mark_closed();
        self.port = None;
        self.subscriptions.clear();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Closed));
        }
    }
}

async fn next_message<P: Port>(port: &mut Option<P>) -> Option<Message> {
    match port {
        Some(port) => port.recv().await,
        None => std::future::pending().await,
    }
}
