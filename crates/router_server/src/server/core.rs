//! Core message router server implementation.
//!
//! This module contains the `MessageRouterServer` struct, which owns the broker,
//! runs the WebSocket accept loop and hands out in-process connections.

use crate::{
    broker::Broker,
    config::ServerConfig,
    error::ServerError,
    server::handlers::{handle_connection, serve_channel},
    server::in_process::InProcessConnector,
};
use router_core::{DuplexChannel, InProcessChannel, ACCESS_TOKEN_ENV_VAR, URL_ENV_VAR};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// The message router server.
///
/// `MessageRouterServer` is cheap to clone; every clone drives the same broker
/// and shares the same shutdown signal.
///
/// # Lifecycle
///
/// 1. [`listen`](Self::listen) binds the configured address and records it
/// 2. [`serve`](Self::serve) accepts connections until [`shutdown`](Self::shutdown)
/// 3. On shutdown every client connection is closed
///
/// [`start`](Self::start) combines the first two steps.
#[derive(Clone)]
pub struct MessageRouterServer {
    /// Server configuration settings
    config: Arc<ServerConfig>,

    /// Routing state shared by every connection
    broker: Arc<Broker>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,

    /// Set once shutdown is requested, for accept loops that start afterwards
    shutdown_requested: Arc<AtomicBool>,

    /// Address the listener actually bound, known after `listen`
    local_addr: Arc<OnceLock<SocketAddr>>,
}

impl MessageRouterServer {
    /// Creates a new server with the specified configuration.
    pub fn new(config: ServerConfig) -> Self {
        let broker = Arc::new(Broker::new(&config));
        Self::with_broker(config, broker)
    }

    /// Creates a server around an existing broker, e.g. one with a custom
    /// access token validator.
    pub fn with_broker(config: ServerConfig, broker: Arc<Broker>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            broker,
            shutdown_sender,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            local_addr: Arc::new(OnceLock::new()),
        }
    }

    /// Binds the configured address.
    ///
    /// Binding port 0 picks a free port; [`url`](Self::url) reports the real one.
    pub async fn listen(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| {
                ServerError::Network(format!("Failed to bind {}: {e}", self.config.bind_address))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Failed to read bound address: {e}")))?;

        if self.local_addr.set(local_addr).is_err() {
            warn!("Server was already listening; keeping the first bound address");
        }
        info!("🌐 Message router listening on {}", self.url().unwrap_or_default());
        Ok(listener)
    }

    /// Runs the accept loop on `listener` until shutdown is requested.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        while !self.shutdown_requested.load(Ordering::SeqCst) {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted TCP connection from {}", addr);
                        let broker = self.broker.clone();
                        let config = self.config.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, broker, config).await {
                                warn!("{}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("🛑 Accept loop stopping - shutdown requested");
                    break;
                }
            }
        }

        self.broker.close_all().await;
        info!("Message router stopped");
        Ok(())
    }

    /// Binds and serves until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Stops the accept loop and closes every client connection.
    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        if self.shutdown_sender.send(()).is_err() {
            debug!("Shutdown requested while no accept loop was running");
        }
    }

    /// The WebSocket URL clients connect to, once the server is listening.
    pub fn url(&self) -> Option<String> {
        self.local_addr
            .get()
            .map(|addr| format!("ws://{addr}{}", self.config.websocket_path))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.config.access_token.as_deref()
    }

    /// Environment variables a launcher injects into client processes.
    pub fn launch_environment(&self) -> Vec<(String, String)> {
        let mut environment = Vec::with_capacity(2);
        if let Some(url) = self.url() {
            environment.push((URL_ENV_VAR.to_string(), url));
        }
        if let Some(token) = self.access_token() {
            environment.push((ACCESS_TOKEN_ENV_VAR.to_string(), token.to_string()));
        }
        environment
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Opens a connection that never leaves this process.
    ///
    /// Returns the client end of an in-process channel pair; the server end is
    /// served by this server's broker like any WebSocket connection.
    pub fn connect_in_process(&self) -> Arc<dyn DuplexChannel> {
        let capacity = self.config.websocket.inbound_capacity;
        let (client_end, server_end) = InProcessChannel::pair(capacity);

        let broker = self.broker.clone();
        let outbound_capacity = self.config.outbound_queue_capacity;
        tokio::spawn(async move {
            serve_channel(broker, Arc::new(server_end), outbound_capacity).await;
        });

        Arc::new(client_end)
    }

    /// A [`Connector`](router_core::Connector) that opens in-process connections to this server.
    pub fn in_process_connector(&self) -> InProcessConnector {
        InProcessConnector::new(self.clone())
    }
}

impl std::fmt::Debug for MessageRouterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouterServer")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr.get())
            .finish()
    }
}
