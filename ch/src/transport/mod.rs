//! Origin-tagged message transports
//!
//! A [`Port`] is one end of a channel between two contexts. Every delivered
//! [`Message`] carries the sender's origin as established by the transport,
//! and a message posted to an exact target origin is only delivered to a
//! receiver at that origin.

use async_trait::async_trait;
use thiserror::Error;

use crate::origin::{Origin, TargetOrigin};

pub mod memory;
pub mod socket;

pub use memory::{MemoryPort, MemorySender, pair};
pub use socket::{SocketPort, cleanup_socket, create_listener_at, get_socket_path};

/// Errors from transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(String),
}

/// A received payload and the origin that sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: Origin,
    pub data: String,
}

impl Message {
    pub fn new(origin: Origin, data: impl Into<String>) -> Self {
        Self {
            origin,
            data: data.into(),
        }
    }
}

/// One endpoint of an asynchronous, origin-tagged channel
#[async_trait]
pub trait Port: Send + Sync + 'static {
    /// Origin this endpoint sends as
    fn origin(&self) -> &Origin;

    /// Post a payload; receivers whose origin the target rejects never see it
    async fn send(&self, data: String, target: &TargetOrigin) -> Result<(), TransportError>;

    /// Next message addressed to this endpoint, `None` once the channel closes
    async fn recv(&mut self) -> Option<Message>;
}
