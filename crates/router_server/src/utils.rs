//! Utility functions for creating server instances.

use crate::{config::ServerConfig, server::MessageRouterServer};

/// Creates a new server with default configuration.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use router_server::create_server;
///
/// let server = create_server();
/// assert!(server.url().is_none());
/// # }
/// ```
pub fn create_server() -> MessageRouterServer {
    MessageRouterServer::new(ServerConfig::default())
}

/// Creates a new server with custom configuration.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use router_server::{create_server_with_config, ServerConfig};
///
/// let config = ServerConfig {
///     bind_address: "127.0.0.1:0".parse().unwrap(),
///     access_token: Some("secret".to_string()),
///     ..Default::default()
/// };
///
/// let server = create_server_with_config(config);
/// assert_eq!(server.access_token(), Some("secret"));
/// # }
/// ```
pub fn create_server_with_config(config: ServerConfig) -> MessageRouterServer {
    MessageRouterServer::new(config)
}
