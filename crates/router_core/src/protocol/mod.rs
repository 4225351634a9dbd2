//! Wire protocol: message set, payload buffers and name validation.

mod buffer;
mod messages;
mod scope;
mod validation;

pub use buffer::{BufferError, MessageBuffer};
pub use messages::*;
pub use scope::MessageScope;
pub use validation::{is_valid_endpoint, is_valid_topic, validate_endpoint, validate_topic};
