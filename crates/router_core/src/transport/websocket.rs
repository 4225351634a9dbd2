//! WebSocket transport.
//!
//! Every [`WebSocketChannel`] runs one receive task and one send task over the two
//! halves of a split `WebSocketStream`. The receive task feeds complete frames into a
//! [`FrameDecoder`] and forwards every decoded message; the send task drains the
//! outbound queue, writing each message as a single text frame. A supervisor task
//! waits for either loop to finish, stops the other one and reports a failure into
//! the inbound queue exactly once.

use crate::channel::{next_channel_id, ChannelId, CloseSignal, Connector, DuplexChannel};
use crate::codec::{encode_to_string, FrameDecoder, FrameLimits};
use crate::error::ChannelError;
use crate::protocol::Message;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};
use tracing::{debug, error, trace, warn};

/// How long a finished loop waits for its partner to flush a close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Tuning for a WebSocket channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Messages waiting to be written before `send` starts waiting.
    pub outbound_capacity: usize,
    /// Decoded messages waiting to be received before the read loop stops reading.
    pub inbound_capacity: usize,
    #[serde(default)]
    pub limits: FrameLimits,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 1024,
            inbound_capacity: 1024,
            limits: FrameLimits::default(),
        }
    }
}

/// Requests the receive loop makes of the send loop, which owns the sink.
#[derive(Debug)]
enum Control {
    Pong(Vec<u8>),
    AcknowledgeClose,
}

type Inbound = mpsc::Receiver<Result<Message, ChannelError>>;

pub struct WebSocketChannel {
    id: ChannelId,
    peer: String,
    outbound: mpsc::Sender<Message>,
    inbound: AsyncMutex<Inbound>,
    /// Tripped by `close`; makes the channel inert for its owner.
    closed: CloseSignal,
    /// Tripped when the loops must stop, whoever initiated it.
    shutdown: CloseSignal,
}

impl WebSocketChannel {
    /// Opens a client connection to `url`.
    pub async fn connect(url: &str, config: WebSocketConfig) -> Result<Self, ChannelError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::ConnectFailed(format!("{url}: {e}")))?;
        debug!("🔗 WebSocket connected to {}", url);
        Ok(Self::from_stream(stream, url.to_string(), config))
    }

    /// Performs the server side of the handshake, accepting only requests for `path`.
    pub async fn accept<S>(
        stream: S,
        peer: String,
        path: &str,
        config: WebSocketConfig,
    ) -> Result<Self, ChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let expected_path = path.to_string();
        let check_path =
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                if request.uri().path() == expected_path {
                    Ok(response)
                } else {
                    let mut rejection = ErrorResponse::new(Some(format!(
                        "No message router endpoint at {}",
                        request.uri().path()
                    )));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            };

        let stream = accept_hdr_async(stream, check_path)
            .await
            .map_err(|e| ChannelError::ConnectFailed(format!("WebSocket handshake failed: {e}")))?;
        Ok(Self::from_stream(stream, peer, config))
    }

    /// Wraps an established WebSocket stream and starts its loops.
    pub fn from_stream<S>(stream: WebSocketStream<S>, peer: String, config: WebSocketConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = next_channel_id();
        let (sink, source) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let closed = CloseSignal::new();
        let shutdown = CloseSignal::new();

        let reader = tokio::spawn(receive_loop(
            id,
            source,
            inbound_tx.clone(),
            control_tx,
            FrameDecoder::new(config.limits.clone()),
        ));
        let writer = tokio::spawn(send_loop(id, sink, outbound_rx, control_rx, shutdown.clone()));
        tokio::spawn(supervise(id, reader, writer, inbound_tx, shutdown.clone()));

        Self {
            id,
            peer,
            outbound: outbound_tx,
            inbound: AsyncMutex::new(inbound_rx),
            closed,
            shutdown,
        }
    }
}

impl std::fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    async fn send(&self, message: Message) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        tokio::select! {
            result = self.outbound.send(message) => result.map_err(|_| ChannelError::Closed),
            _ = self.shutdown.closed() => Err(ChannelError::Closed),
        }
    }

    async fn receive(&self) -> Result<Message, ChannelError> {
        if self.closed.is_closed() {
            return Err(ChannelError::Closed);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            item = inbound.recv() => match item {
                Some(result) => result,
                None => Err(ChannelError::Closed),
            },
            _ = self.closed.closed() => Err(ChannelError::Closed),
        }
    }

    async fn close(&self) {
        if self.closed.close() {
            debug!("Closing WebSocket channel {} ({})", self.id, self.peer);
        }
        self.shutdown.close();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed() || self.shutdown.is_closed()
    }
}

async fn receive_loop<S>(
    id: ChannelId,
    mut source: SplitStream<WebSocketStream<S>>,
    inbound: mpsc::Sender<Result<Message, ChannelError>>,
    control: mpsc::UnboundedSender<Control>,
    mut decoder: FrameDecoder,
) -> Result<(), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = source.next().await {
        let decoded = match frame {
            Ok(WsMessage::Text(text)) => decoder.push(text.as_str().as_bytes()),
            Ok(WsMessage::Binary(data)) => decoder.push(&data),
            Ok(WsMessage::Ping(data)) => {
                let _ = control.send(Control::Pong(data.to_vec()));
                continue;
            }
            Ok(WsMessage::Close(frame)) => {
                debug!("🔌 Channel {} closed by peer: {:?}", id, frame);
                let _ = control.send(Control::AcknowledgeClose);
                return Ok(());
            }
            Ok(_) => continue,
            Err(e) => return Err(ChannelError::Aborted(e.to_string())),
        };

        let messages = decoded.map_err(|e| {
            warn!("⚠️ Channel {} input is unrecoverable: {}", id, e);
            ChannelError::Aborted(e.to_string())
        })?;

        for message in messages {
            trace!("Channel {} received {}", id, message.message_type());
            if inbound.send(Ok(message)).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

async fn send_loop<S>(
    id: ChannelId,
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outbound: mpsc::Receiver<Message>,
    mut control: mpsc::UnboundedReceiver<Control>,
    shutdown: CloseSignal,
) -> Result<(), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            Some(request) = control.recv() => match request {
                Control::Pong(data) => {
                    sink.send(WsMessage::Pong(data.into()))
                        .await
                        .map_err(|e| ChannelError::Aborted(e.to_string()))?;
                }
                Control::AcknowledgeClose => {
                    let _ = sink.close().await;
                    return Ok(());
                }
            },
            _ = shutdown.closed() => {
                let close = WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: String::from("Connection closed").into(),
                }));
                let _ = sink.send(close).await;
                let _ = sink.close().await;
                return Ok(());
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.close().await;
                    return Ok(());
                };
                let text = match encode_to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {} message: {}", message.message_type(), e);
                        continue;
                    }
                };
                trace!("Channel {} sending {}", id, message.message_type());
                sink.send(WsMessage::Text(text.into()))
                    .await
                    .map_err(|e| ChannelError::Aborted(e.to_string()))?;
            }
        }
    }
}

async fn supervise(
    id: ChannelId,
    mut reader: JoinHandle<Result<(), ChannelError>>,
    mut writer: JoinHandle<Result<(), ChannelError>>,
    inbound: mpsc::Sender<Result<Message, ChannelError>>,
    shutdown: CloseSignal,
) {
    let outcome = tokio::select! {
        result = &mut reader => {
            shutdown.close();
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                writer.abort();
            }
            result
        }
        result = &mut writer => {
            shutdown.close();
            let failed = !matches!(result, Ok(Ok(())));
            if failed || tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
            result
        }
    };

    let outcome = outcome.unwrap_or_else(|e| Err(ChannelError::Aborted(e.to_string())));
    match outcome {
        Ok(()) => debug!("WebSocket channel {} finished", id),
        Err(e) => {
            error!("WebSocket channel {} failed: {}", id, e);
            let _ = inbound.send(Err(e)).await;
        }
    }
}

/// Opens WebSocket channels to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    config: WebSocketConfig,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(url, WebSocketConfig::default())
    }

    pub fn with_config(url: impl Into<String>, config: WebSocketConfig) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Arc<dyn DuplexChannel>, ChannelError> {
        let channel = WebSocketChannel::connect(&self.url, self.config.clone()).await?;
        Ok(Arc::new(channel))
    }
}
