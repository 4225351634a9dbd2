//! Connection handling logic for broker clients.
//!
//! This module contains the per-connection lifecycle: the WebSocket handshake,
//! the receive loop that feeds the broker, the pump that drains the
//! connection's outbound queue, and cleanup when the connection ends.

use crate::{
    broker::Broker,
    config::ServerConfig,
    connection::{ClientId, ClientLink},
    error::ServerError,
    messaging::route_message,
};
use router_core::{ChannelError, DuplexChannel, WebSocketChannel};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Handles a single WebSocket client from handshake to cleanup.
///
/// Requests for any path other than the configured one are refused during the
/// handshake.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    broker: Arc<Broker>,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let _ = stream.set_nodelay(true);
    let channel = WebSocketChannel::accept(
        stream,
        addr.to_string(),
        &config.websocket_path,
        config.websocket.clone(),
    )
    .await
    .map_err(|e| ServerError::Network(format!("Handshake with {addr} failed: {e}")))?;

    debug!("🤝 WebSocket handshake completed with {}", addr);
    serve_channel(broker, Arc::new(channel), config.outbound_queue_capacity).await;
    Ok(())
}

/// Serves one duplex channel until it closes.
///
/// Two tasks run per connection:
///
/// * **Incoming**: receives messages and routes them through the broker, one at a time
/// * **Outgoing**: drains the broker's bounded outbound queue into the channel
///
/// When the incoming side ends the client's session is destroyed and the channel
/// is closed.
pub async fn serve_channel(
    broker: Arc<Broker>,
    channel: Arc<dyn DuplexChannel>,
    outbound_capacity: usize,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel(outbound_capacity.max(1));
    let link = ClientLink::new(outbound_tx, channel.clone());
    info!("🔗 Connection {} opened from {}", channel.id(), channel.peer());

    // Outgoing message task
    let outgoing_task = {
        let channel = channel.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = channel.send(message).await {
                    debug!("Stopped sending to {}: {}", channel.peer(), e);
                    break;
                }
            }
        })
    };

    // Incoming message loop
    let mut client_id: Option<ClientId> = None;
    loop {
        match channel.receive().await {
            Ok(message) => route_message(&broker, &link, &mut client_id, message).await,
            Err(ChannelError::Closed) => {
                trace!("Connection {} closed", channel.id());
                break;
            }
            Err(e) => {
                error!("Connection {} from {} failed: {}", channel.id(), channel.peer(), e);
                break;
            }
        }
    }

    if let Some(client_id) = client_id {
        broker.disconnect(&client_id, channel.id()).await;
    }
    channel.close().await;
    drop(link);
    outgoing_task.abort();
    info!("❌ Connection {} from {} closed", channel.id(), channel.peer());
}
