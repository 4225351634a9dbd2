//! Transport-agnostic duplex channel contract.

use crate::error::ChannelError;
use crate::protocol::Message;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Unique identifier for a channel within this process.
pub type ChannelId = u64;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_channel_id() -> ChannelId {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)
}

/// A bidirectional, message-oriented connection.
///
/// `send` enqueues for transmission and only waits when the outbound queue is full.
/// `receive` yields decoded inbound messages in the order the peer sent them and
/// must only be driven by one task at a time. After `close`, or after the peer or
/// the transport goes away, every operation fails. A transport failure is reported
/// once by `receive` as [`ChannelError::Aborted`]; later calls report
/// [`ChannelError::Closed`].
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Human-readable description of the remote end, for logging.
    fn peer(&self) -> &str;

    async fn send(&self, message: Message) -> Result<(), ChannelError>;

    async fn receive(&self) -> Result<Message, ChannelError>;

    /// Closes both directions. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens new channels to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn DuplexChannel>, ChannelError>;
}

/// One-way latch used to stop the tasks behind a channel.
#[derive(Debug, Clone)]
pub(crate) struct CloseSignal {
    state: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Trips the latch. Returns `true` for the call that actually tripped it.
    pub(crate) fn close(&self) -> bool {
        !self.state.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.state.borrow()
    }

    pub(crate) async fn closed(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so `wait_for` cannot fail here.
        let _ = receiver.wait_for(|closed| *closed).await;
    }
}
