//! Per-client state held by the broker.
//!
//! A [`ClientLink`] is the broker's handle on one open channel: a bounded
//! outbound queue drained by the connection's pump task, plus the channel itself
//! so a stalled client can be closed. A [`ClientSession`] is the state attached
//! to a link once the client has completed `Connect`.

use router_core::protocol::Message;
use router_core::{ChannelId, DuplexChannel};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Identifier the broker assigns to a connected client.
pub type ClientId = String;

/// Outcome of handing a message to a client's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue was full. The client is being disconnected.
    Evicted,
    /// The connection is already gone.
    Closed,
}

/// The broker's sending half of one connection.
#[derive(Clone)]
pub struct ClientLink {
    outbound: mpsc::Sender<Message>,
    channel: Arc<dyn DuplexChannel>,
}

impl ClientLink {
    pub fn new(outbound: mpsc::Sender<Message>, channel: Arc<dyn DuplexChannel>) -> Self {
        Self { outbound, channel }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn peer(&self) -> &str {
        self.channel.peer()
    }

    /// Queues `message` without waiting.
    ///
    /// A client that cannot keep up with its queue is closed rather than allowed
    /// to hold up delivery to everyone else. Its session is cleaned up when the
    /// connection's serve loop observes the close.
    pub fn deliver(&self, message: Message) -> Delivery {
        match self.outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    "🐢 Outbound queue full for {} while sending {}; disconnecting slow consumer",
                    self.channel.peer(),
                    message.message_type()
                );
                let channel = self.channel.clone();
                tokio::spawn(async move { channel.close().await });
                Delivery::Evicted
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                trace!(
                    "Dropping {} for closed connection {}",
                    message.message_type(),
                    self.channel.peer()
                );
                Delivery::Closed
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed() || self.outbound.is_closed()
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl std::fmt::Debug for ClientLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLink")
            .field("channel", &self.channel.id())
            .field("peer", &self.channel.peer())
            .finish()
    }
}

/// A client that has completed `Connect`.
#[derive(Debug)]
pub struct ClientSession {
    pub client_id: ClientId,

    pub link: ClientLink,

    pub connected_at: SystemTime,

    /// Topics this client is subscribed to
    pub subscriptions: HashSet<String>,

    /// Endpoints this client currently owns
    pub endpoints: HashSet<String>,
}

impl ClientSession {
    pub fn new(client_id: ClientId, link: ClientLink) -> Self {
        Self {
            client_id,
            link,
            connected_at: SystemTime::now(),
            subscriptions: HashSet::new(),
            endpoints: HashSet::new(),
        }
    }
}
