//! In-process transport over tokio channels

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Message, Port, TransportError};
use crate::origin::{Origin, TargetOrigin};

type Envelope = (Message, TargetOrigin);

/// In-process endpoint created by [`pair`]
#[derive(Debug)]
pub struct MemoryPort {
    origin: Origin,
    peer: mpsc::UnboundedSender<Envelope>,
    inbox_tx: mpsc::WeakUnboundedSender<Envelope>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
}

/// Create two connected endpoints at the given origins
pub fn pair(a: Origin, b: Origin) -> (MemoryPort, MemoryPort) {
    debug!(%a, %b, "memory::pair: called");
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a_port = MemoryPort {
        origin: a,
        peer: b_tx.clone(),
        inbox_tx: a_tx.downgrade(),
        inbox: a_rx,
    };
    let b_port = MemoryPort {
        origin: b,
        peer: a_tx,
        inbox_tx: b_tx.downgrade(),
        inbox: b_rx,
    };
    (a_port, b_port)
}

impl MemoryPort {
    /// A handle that posts into this endpoint's inbox as another origin
    ///
    /// Stands in for unrelated contexts that can reach the same endpoint.
    /// Returns `None` once nothing else can reach the inbox.
    pub fn sender_as(&self, origin: Origin) -> Option<MemorySender> {
        let inbox = self.inbox_tx.upgrade()?;
        Some(MemorySender { origin, inbox })
    }
}

#[async_trait]
impl Port for MemoryPort {
    fn origin(&self) -> &Origin {
        &self.origin
    }

    async fn send(&self, data: String, target: &TargetOrigin) -> Result<(), TransportError> {
        self.peer
            .send((Message::new(self.origin.clone(), data), target.clone()))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Message> {
        loop {
            let (message, target) = self.inbox.recv().await?;
            if target.accepts(&self.origin) {
                return Some(message);
            }
            debug!(%target, origin = %self.origin, "MemoryPort::recv: dropping message for other origin");
        }
    }
}

/// Extra sender into a [`MemoryPort`], see [`MemoryPort::sender_as`]
#[derive(Debug, Clone)]
pub struct MemorySender {
    origin: Origin,
    inbox: mpsc::UnboundedSender<Envelope>,
}

impl MemorySender {
    pub fn post(&self, data: impl Into<String>, target: TargetOrigin) -> Result<(), TransportError> {
        self.inbox
            .send((Message::new(self.origin.clone(), data), target))
            .map_err(|_| TransportError::Closed)
    }
}
