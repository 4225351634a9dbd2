//! # Message Router Server
//!
//! The broker side of the message router: a pub/sub and RPC hub that clients
//! reach over WebSocket or, inside the same process, over in-memory channels.
//!
//! ## Architecture Overview
//!
//! * **Broker** - Owns the client registry, topic subscriptions, endpoint
//!   registry and pending invocations behind one lock
//! * **Connection handling** - One receive loop and one send pump per client,
//!   joined by a bounded outbound queue
//! * **Message dispatch** - Maps each protocol message onto a broker operation
//!   and answers request-shaped messages
//! * **Security** - Pluggable access token validation on `Connect`
//!
//! ### Message Flow
//!
//! 1. A client opens a channel and sends `Connect`; the broker assigns a client id
//! 2. `Subscribe`/`Publish` fan out `Topic` messages to every subscriber
//! 3. `RegisterService` claims an endpoint; `Invoke` is forwarded to its owner
//! 4. The owner's `InvokeResponse` is routed back to the caller
//! 5. When the channel closes the client's subscriptions and endpoints are released
//!
//! ## Error Handling
//!
//! Protocol failures are answered inside response messages using the
//! [`router_core::ErrorKind`] taxonomy and never close a connection.
//! [`ServerError`] covers the server's own failures:
//!
//! * **Network errors** - Binding, accepting and handshake problems
//! * **Internal errors** - Anything else

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod security;
pub mod server;
pub mod utils;

pub use broker::Broker;
pub use config::ServerConfig;
pub use connection::{ClientId, ClientLink, ClientSession, Delivery};
pub use error::ServerError;
pub use security::{AccessTokenValidator, StaticTokenValidator};
pub use server::{MessageRouterServer, InProcessConnector};
pub use utils::{create_server, create_server_with_config};

#[cfg(test)]
mod tests;
