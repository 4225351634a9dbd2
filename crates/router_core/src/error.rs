//! Error types shared by the broker and the client.
//!
//! Protocol failures travel inside response messages as an [`ErrorInfo`]
//! (`{name, message}`) and surface to callers as a [`RouterError`]. The set of
//! names the router itself produces is the fixed [`ErrorKind`] enumeration;
//! service handlers may report any other name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed error taxonomy understood by both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DuplicateEndpoint,
    DuplicateRequestId,
    InvalidEndpoint,
    InvalidTopic,
    UnknownEndpoint,
    UnknownClient,
    ConnectionClosed,
    ConnectionAborted,
    InvalidAccessToken,
    ConnectionFailed,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::DuplicateEndpoint,
        ErrorKind::DuplicateRequestId,
        ErrorKind::InvalidEndpoint,
        ErrorKind::InvalidTopic,
        ErrorKind::UnknownEndpoint,
        ErrorKind::UnknownClient,
        ErrorKind::ConnectionClosed,
        ErrorKind::ConnectionAborted,
        ErrorKind::InvalidAccessToken,
        ErrorKind::ConnectionFailed,
    ];

    /// The name carried in the `name` field of a wire error.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateEndpoint => "DuplicateEndpoint",
            ErrorKind::DuplicateRequestId => "DuplicateRequestId",
            ErrorKind::InvalidEndpoint => "InvalidEndpoint",
            ErrorKind::InvalidTopic => "InvalidTopic",
            ErrorKind::UnknownEndpoint => "UnknownEndpoint",
            ErrorKind::UnknownClient => "UnknownClient",
            ErrorKind::ConnectionClosed => "ConnectionClosed",
            ErrorKind::ConnectionAborted => "ConnectionAborted",
            ErrorKind::InvalidAccessToken => "InvalidAccessToken",
            ErrorKind::ConnectionFailed => "ConnectionFailed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// Wire representation of an error inside a response message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: Some(message.into()),
        }
    }

    /// The taxonomy value this error names, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.name.parse().ok()
    }
}

/// Error name used for failures raised by service handlers that carry no name of their own.
pub const SERVICE_ERROR_NAME: &str = "ServiceError";

/// Tagged error result returned by router operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// One of the taxonomy errors.
    #[error("{kind}: {message}")]
    Protocol { kind: ErrorKind, message: String },

    /// An error reported by a remote service handler.
    #[error("{name}: {message}")]
    Service { name: String, message: String },

    /// The local caller cancelled the operation.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl RouterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RouterError::Protocol {
            kind,
            message: message.into(),
        }
    }

    pub fn service(name: impl Into<String>, message: impl Into<String>) -> Self {
        RouterError::Service {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn duplicate_endpoint(endpoint: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateEndpoint,
            format!("Duplicate endpoint registration: '{endpoint}'"),
        )
    }

    pub fn duplicate_request_id(request_id: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateRequestId,
            format!("Request id '{request_id}' is already pending"),
        )
    }

    pub fn invalid_endpoint(endpoint: &str) -> Self {
        Self::new(
            ErrorKind::InvalidEndpoint,
            format!("Invalid endpoint: '{endpoint}'"),
        )
    }

    pub fn invalid_topic(topic: &str) -> Self {
        Self::new(ErrorKind::InvalidTopic, format!("Invalid topic: '{topic}'"))
    }

    pub fn unknown_endpoint(endpoint: &str) -> Self {
        Self::new(
            ErrorKind::UnknownEndpoint,
            format!("Unknown endpoint: '{endpoint}'"),
        )
    }

    pub fn unknown_client(client_id: &str) -> Self {
        Self::new(
            ErrorKind::UnknownClient,
            format!("Unknown client: '{client_id}'"),
        )
    }

    pub fn connection_closed() -> Self {
        Self::new(ErrorKind::ConnectionClosed, "The connection has been closed")
    }

    pub fn connection_aborted(reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ConnectionAborted,
            format!("The connection was aborted: {reason}"),
        )
    }

    pub fn connection_failed(reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ConnectionFailed,
            format!("Failed to connect: {reason}"),
        )
    }

    pub fn invalid_access_token() -> Self {
        Self::new(ErrorKind::InvalidAccessToken, "Invalid access token")
    }

    /// The taxonomy value of this error, if it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RouterError::Protocol { kind, .. } => Some(*kind),
            RouterError::Service { name, .. } => name.parse().ok(),
            RouterError::Cancelled => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RouterError::Protocol { kind, .. } => kind.as_str(),
            RouterError::Service { name, .. } => name,
            RouterError::Cancelled => "Cancelled",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RouterError::Protocol { message, .. } | RouterError::Service { message, .. } => message,
            RouterError::Cancelled => "the operation was cancelled",
        }
    }

    /// Converts the error into the form carried by response messages.
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.name(), self.message())
    }
}

impl From<ErrorInfo> for RouterError {
    fn from(info: ErrorInfo) -> Self {
        let message = info.message.unwrap_or_default();
        match info.name.parse::<ErrorKind>() {
            Ok(kind) => RouterError::Protocol { kind, message },
            Err(()) => RouterError::Service {
                name: info.name,
                message,
            },
        }
    }
}

impl From<&ErrorInfo> for RouterError {
    fn from(info: &ErrorInfo) -> Self {
        RouterError::from(info.clone())
    }
}

/// Failure of a duplex channel operation.
///
/// Once a channel has failed every later operation on it reports [`ChannelError::Closed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("connection closed")]
    Closed,

    #[error("connection aborted: {0}")]
    Aborted(String),

    #[error("connection failed: {0}")]
    ConnectFailed(String),
}

impl From<ChannelError> for RouterError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Closed => RouterError::connection_closed(),
            ChannelError::Aborted(reason) => RouterError::connection_aborted(reason),
            ChannelError::ConnectFailed(reason) => RouterError::connection_failed(reason),
        }
    }
}
