//! Server implementation and connection handling.
//!
//! * `core` - The `MessageRouterServer` struct and its lifecycle
//! * `handlers` - Per-connection serving logic
//! * `in_process` - Connector for clients living in the same runtime

pub mod core;
pub mod handlers;
pub mod in_process;

pub use core::MessageRouterServer;
pub use in_process::InProcessConnector;
