//! # Router Core - Protocol and Transports
//!
//! Shared foundation of the message router: the wire protocol spoken between clients
//! and the broker, its JSON codec, the error taxonomy, and the duplex channel
//! abstraction with its WebSocket and in-process implementations.
//!
//! ## Wire Format
//!
//! Every message is a JSON object with a `type` discriminator and camelCase fields.
//! The discriminator may appear anywhere in the object:
//!
//! ```json
//! {"topic": "prices", "payload": "101.5", "type": "Publish"}
//! ```
//!
//! Payloads are opaque [`MessageBuffer`]s, carried as JSON strings.
//!
//! ## Channels
//!
//! Broker and client only ever see a [`DuplexChannel`]. The WebSocket adapter
//! reassembles JSON documents from the frame stream; the in-process adapter passes
//! messages by value. Both behave identically towards their users.

pub use channel::{ChannelId, Connector, DuplexChannel};
pub use codec::{CodecError, FrameDecoder, FrameLimits};
pub use error::{ChannelError, ErrorInfo, ErrorKind, RouterError, SERVICE_ERROR_NAME};
pub use protocol::{MessageBuffer, MessageScope};
pub use transport::{InProcessChannel, WebSocketChannel, WebSocketConfig, WebSocketConnector};

/// Environment variable through which launched processes learn the broker's URL.
pub const URL_ENV_VAR: &str = "MESSAGE_ROUTER_URL";

/// Environment variable carrying the access token clients present on connect.
pub const ACCESS_TOKEN_ENV_VAR: &str = "MESSAGE_ROUTER_ACCESS_TOKEN";

pub mod channel;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;
