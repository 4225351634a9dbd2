//! # Message Router Client
//!
//! Multiplexes topic subscriptions, publishes, service registrations and
//! invocations over a single connection to a message router broker.
//!
//! ```rust,no_run
//! use router_client::{service_fn, ChannelSubscriber, ClientOptions, MessageRouterClient};
//!
//! # async fn example() -> Result<(), router_core::RouterError> {
//! let client = MessageRouterClient::websocket("ws://127.0.0.1:5000/ws", ClientOptions::default());
//!
//! let (subscriber, mut updates) = ChannelSubscriber::new();
//! client.subscribe("prices", subscriber).await?;
//! client.publish("prices", Some("42".into())).await?;
//! let _update = updates.recv().await;
//!
//! client
//!     .register_service("echo", service_fn(|request| async move { Ok(request.payload) }))
//!     .await?;
//! let reply = client.invoke("echo", Some("hello".into())).await?;
//! assert_eq!(reply, Some("hello".into()));
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod client;
pub mod handlers;
pub mod options;
pub mod state;

pub use client::{MessageRouterClient, Subscription};
pub use handlers::{service_fn, ChannelSubscriber, ServiceFn, ServiceHandler, TopicSubscriber};
pub use options::ClientOptions;
pub use state::{ClientEvent, ClientState};
