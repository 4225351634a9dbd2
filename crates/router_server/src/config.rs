//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize the broker's behavior.

use router_core::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Configuration structure for the message router server.
///
/// Contains the network settings, admission limits and per-connection queue sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the WebSocket listener to
    pub bind_address: SocketAddr,

    /// HTTP path clients upgrade on (e.g. `/ws`)
    pub websocket_path: String,

    /// Maximum number of concurrently connected clients
    pub max_connections: usize,

    /// Messages the broker may queue for one client before it is treated as stalled
    pub outbound_queue_capacity: usize,

    /// Token clients must present on connect; `None` disables the check
    pub access_token: Option<String>,

    /// Socket-level tuning shared by every WebSocket connection
    pub websocket: WebSocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            websocket_path: "/ws".to_string(),
            max_connections: 1000,
            outbound_queue_capacity: 1024,
            access_token: None,
            websocket: WebSocketConfig::default(),
        }
    }
}
