//! In-process transport.
//!
//! Two [`InProcessChannel`]s created by [`InProcessChannel::pair`] are wired to each
//! other through bounded tokio channels. Messages cross as values, without any
//! serialization, which lets a client and the broker share one runtime.

use crate::channel::{next_channel_id, ChannelId, CloseSignal, DuplexChannel};
use crate::error::ChannelError;
use crate::protocol::Message;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::trace;

pub struct InProcessChannel {
    id: ChannelId,
    peer: String,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    inbound: AsyncMutex<mpsc::Receiver<Message>>,
    closed: CloseSignal,
}

impl InProcessChannel {
    /// Creates two connected channel ends, each able to buffer `capacity` messages
    /// in flight towards it.
    pub fn pair(capacity: usize) -> (InProcessChannel, InProcessChannel) {
        let capacity = capacity.max(1);
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        let a_id = next_channel_id();
        let b_id = next_channel_id();

        let a = InProcessChannel {
            id: a_id,
            peer: format!("in-process:{b_id}"),
            outbound: Mutex::new(Some(b_tx)),
            inbound: AsyncMutex::new(a_rx),
            closed: CloseSignal::new(),
        };
        let b = InProcessChannel {
            id: b_id,
            peer: format!("in-process:{a_id}"),
            outbound: Mutex::new(Some(a_tx)),
            inbound: AsyncMutex::new(b_rx),
            closed: CloseSignal::new(),
        };
        (a, b)
    }

    fn sender(&self) -> Option<mpsc::Sender<Message>> {
        match self.outbound.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for InProcessChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessChannel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.closed.is_closed())
            .finish()
    }
}

#[async_trait]
impl DuplexChannel for InProcessChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    async fn send(&self, message: Message) -> Result<(), ChannelError> {
        if self.closed.is_closed() {
            return Err(ChannelError::Closed);
        }
        let sender = self.sender().ok_or(ChannelError::Closed)?;
        trace!("Channel {} sending {}", self.id, message.message_type());

        tokio::select! {
            result = sender.send(message) => result.map_err(|_| ChannelError::Closed),
            _ = self.closed.closed() => Err(ChannelError::Closed),
        }
    }

    async fn receive(&self) -> Result<Message, ChannelError> {
        if self.closed.is_closed() {
            return Err(ChannelError::Closed);
        }

        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            message = inbound.recv() => message.ok_or(ChannelError::Closed),
            _ = self.closed.closed() => Err(ChannelError::Closed),
        }
    }

    async fn close(&self) {
        if !self.closed.close() {
            return;
        }
        trace!("Closing in-process channel {}", self.id);

        // Dropping our sender ends the peer's inbound stream once it is drained.
        match self.outbound.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
        // Closing our receiver makes the peer's sends fail.
        self.inbound.lock().await.close();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}
