//! Opaque message payloads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// A message payload.
///
/// The router never looks inside a payload. On the wire it is a JSON string holding
/// UTF-8 text; binary content goes through [`MessageBuffer::create_base64`].
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBuffer(String);

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("the provided buffer is not a valid UTF-8 sequence")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("the buffer is not base64-encoded: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("the buffer does not hold the expected JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MessageBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn from_utf8(bytes: Vec<u8>) -> Result<Self, BufferError> {
        Ok(Self(String::from_utf8(bytes)?))
    }

    /// Wraps arbitrary bytes by base64-encoding them.
    pub fn create_base64(bytes: impl AsRef<[u8]>) -> Self {
        Self(STANDARD.encode(bytes))
    }

    pub fn create_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, BufferError> {
        Ok(Self(serde_json::to_string(value)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes a buffer created with [`MessageBuffer::create_base64`].
    pub fn get_base64_bytes(&self) -> Result<Vec<u8>, BufferError> {
        Ok(STANDARD.decode(self.0.as_bytes())?)
    }

    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T, BufferError> {
        Ok(serde_json::from_str(&self.0)?)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageBuffer({:?})", self.0)
    }
}

impl fmt::Display for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageBuffer {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for MessageBuffer {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl TryFrom<Vec<u8>> for MessageBuffer {
    type Error = BufferError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_utf8(bytes)
    }
}
