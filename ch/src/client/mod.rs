//! Storage client that proxies every operation through a hub
//!
//! A [`Client`] is a cheap handle onto a spawned task that owns the port.
//! Requests are correlated by id, so responses may arrive in any order.

mod registry;
mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::origin::Origin;
use crate::permissions::Method;
use crate::protocol::ChangeNotice;
use crate::transport::Port;
use task::{ClientCommand, ClientTask};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

const COMMAND_CHANNEL_CAPACITY: usize = 256;
const SUBSCRIPTION_CAPACITY: usize = 64;

/// Errors surfaced to client callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Closed: client has been closed")]
    Closed,

    #[error("Timeout: could not perform {0}")]
    Timeout(Method),

    /// Hub error string, verbatim
    #[error("{0}")]
    Remote(String),

    #[error("Closed: Unable to read/write to storage")]
    Unavailable,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid url: {0}")]
    Url(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Options for [`Client::new`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    /// Set when attaching to a channel whose hub may already be up
    pub channel_id: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            channel_id: None,
        }
    }
}

impl ClientOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}

const PENDING: u8 = 0;
const CONNECTED: u8 = 1;
const CLOSED: u8 = 2;

/// Connection state shared by the handle and the task
///
/// One atomic so connect and close cannot interleave: once closed, the state
/// never leaves `CLOSED`.
#[derive(Debug, Default)]
pub(crate) struct ClientShared {
    state: AtomicU8,
}

impl ClientShared {
    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CONNECTED
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CLOSED
    }

    /// Flip pending to connected; false if already connected or closed
    pub fn mark_connected(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CONNECTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to closed; false if it already was
    pub fn mark_closed(&self) -> bool {
        self.state.swap(CLOSED, Ordering::SeqCst) != CLOSED
    }
}

/// Wire ttl for a duration
///
/// The wire counts whole milliseconds and treats 0 as no expiry, so a non-zero
/// duration never rounds down to 0.
fn ttl_millis(ttl: Duration) -> i64 {
    if ttl.is_zero() {
        return 0;
    }
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

/// A stream of change notices for one event key
#[derive(Debug)]
pub struct Subscription {
    event_key: String,
    rx: mpsc::Receiver<ChangeNotice>,
}

impl Subscription {
    pub fn event_key(&self) -> &str {
        &self.event_key
    }

    /// Next notice, or None once the client closes or unlistens
    pub async fn recv(&mut self) -> Option<ChangeNotice> {
        self.rx.recv().await
    }
}

/// Handle to a client task
#[derive(Debug, Clone)]
pub struct Client {
    tx: mpsc::Sender<ClientCommand>,
    shared: Arc<ClientShared>,
    target_origin: Origin,
}

impl Client {
    /// Create a client for the hub at `target_url` and spawn its task
    ///
    /// Must be called within a tokio runtime.
    pub fn new<P: Port>(target_url: &str, options: ClientOptions, port: P) -> ClientResult<Self> {
        let target_origin = Origin::from_url(target_url).map_err(|e| ClientError::Url(e.to_string()))?;
        debug!(%target_url, %target_origin, timeout_ms = options.timeout.as_millis() as u64, "Client::new: called");

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let shared = Arc::new(ClientShared::default());
        let task = ClientTask::new(
            port,
            target_origin.clone(),
            options.channel_id.is_some(),
            options.timeout,
            shared.clone(),
            rx,
            tx.downgrade(),
        );
        tokio::spawn(task.run());

        Ok(Self {
            tx,
            shared,
            target_origin,
        })
    }

    pub fn target_origin(&self) -> &Origin {
        &self.target_origin
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves the first time the hub is heard from
    pub async fn on_connect(&self) -> ClientResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        self.send_command(ClientCommand::OnConnect { reply }).await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Send a raw request and wait for its result
    pub async fn request(&self, method: Method, params: Value) -> ClientResult<Value> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let (reply, rx) = oneshot::channel();
        self.send_command(ClientCommand::Request { method, params, reply }).await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub async fn set(&self, key: &str, value: impl Serialize, ttl: Option<Duration>) -> ClientResult<()> {
        let value = serde_json::to_value(value).map_err(|e| ClientError::Serialization(e.to_string()))?;
        let mut params = json!({ "key": key, "value": value });
        if let Some(ttl) = ttl {
            params["ttl"] = json!(ttl_millis(ttl));
        }
        self.request(Method::Set, params).await.map(|_| ())
    }

    /// Read keys; a single key yields the bare value, several yield an array
    pub async fn get(&self, keys: &[&str]) -> ClientResult<Value> {
        if keys.is_empty() {
            return Err(ClientError::InvalidArgument("get requires at least one key".to_string()));
        }
        self.request(Method::Get, json!({ "keys": keys })).await
    }

    /// Read a single key into a typed value
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> ClientResult<Option<T>> {
        match self.get(&[key]).await? {
            Value::Null => Ok(None),
            value => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ClientError::Serialization(e.to_string())),
        }
    }

    pub async fn del(&self, keys: &[&str]) -> ClientResult<()> {
        self.request(Method::Del, json!({ "keys": keys })).await.map(|_| ())
    }

    pub async fn get_keys(&self) -> ClientResult<Vec<String>> {
        let value = self.request(Method::GetKeys, json!({})).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Serialization(e.to_string()))
    }

    pub async fn clear(&self) -> ClientResult<()> {
        self.request(Method::Clear, json!({})).await.map(|_| ())
    }

    /// Subscribe to store changes under `event_key`
    pub async fn listen(&self, event_key: &str) -> ClientResult<Subscription> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let (events, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let (reply, fresh) = oneshot::channel();
        self.send_command(ClientCommand::Subscribe {
            event_key: event_key.to_string(),
            events,
            reply,
        })
        .await?;
        let fresh = fresh.await.map_err(|_| ClientError::Closed)?;

        if let Err(e) = self.request(Method::Listen, json!({ "eventKey": event_key })).await {
            if fresh {
                let _ = self
                    .send_command(ClientCommand::Unsubscribe {
                        event_key: event_key.to_string(),
                    })
                    .await;
            }
            return Err(e);
        }

        Ok(Subscription {
            event_key: event_key.to_string(),
            rx,
        })
    }

    pub async fn unlisten(&self, event_key: &str) -> ClientResult<()> {
        self.request(Method::Unlisten, json!({ "eventKey": event_key })).await?;
        self.send_command(ClientCommand::Unsubscribe {
            event_key: event_key.to_string(),
        })
        .await
    }

    /// Detach permanently; requests already in flight still settle or time out
    pub async fn close(&self) {
        debug!(target_origin = %self.target_origin, "Client::close: called");
        if self.shared.mark_closed() {
            let _ = self.tx.send(ClientCommand::Close).await;
        }
    }

    async fn send_command(&self, command: ClientCommand) -> ClientResult<()> {
        self.tx.send(command).await.map_err(|_| ClientError::Closed)
    }
}
