//! Error types and handling for the message router server.
//!
//! Protocol failures are answered inside response messages and never show up
//! here. These errors cover the server's own operation.

/// Enumeration of possible server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or broken connections
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<router_core::ChannelError> for ServerError {
    fn from(error: router_core::ChannelError) -> Self {
        ServerError::Network(error.to_string())
    }
}
