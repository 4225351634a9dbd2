//! Transport adapters implementing [`crate::DuplexChannel`].

mod memory;
mod websocket;

pub use memory::InProcessChannel;
pub use websocket::{WebSocketChannel, WebSocketConfig, WebSocketConnector};
