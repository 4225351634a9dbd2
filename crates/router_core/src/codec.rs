//! JSON encoding of protocol messages.
//!
//! Decoding is two-pass: the object is parsed into a `serde_json::Value`, the `type`
//! field is looked up wherever it sits, and the value is then decoded into the
//! concrete message struct. [`FrameDecoder`] adds stream reassembly on top of that
//! for transports that deliver text in arbitrary chunks.

use crate::protocol::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Message has no 'type' field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {message_type} message: {source}")]
    InvalidMessage {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("Buffered input of {size} bytes exceeds the limit of {limit} bytes")]
    BufferOverflow { size: usize, limit: usize },

    #[error("Too many malformed frames in a row ({count})")]
    TooManyMalformedFrames { count: usize },
}

impl CodecError {
    /// Whether the error ends the connection rather than just the current frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::BufferOverflow { .. } | CodecError::TooManyMalformedFrames { .. }
        )
    }
}

pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn encode_to_string(message: &Message) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes a buffer holding exactly one JSON document.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let value: Value = serde_json::from_slice(bytes)?;
    decode_value(value)
}

pub fn decode_str(text: &str) -> Result<Message, CodecError> {
    decode(text.as_bytes())
}

/// Decodes an already parsed JSON value.
pub fn decode_value(value: Value) -> Result<Message, CodecError> {
    let type_value = match &value {
        Value::Object(map) => map.get("type").ok_or(CodecError::MissingType)?,
        _ => return Err(CodecError::NotAnObject),
    };

    let message_type = MessageType::deserialize(type_value)
        .map_err(|_| CodecError::UnknownType(type_value.to_string()))?;

    let message = match message_type {
        MessageType::Connect => Message::Connect(decode_as(message_type, value)?),
        MessageType::ConnectResponse => Message::ConnectResponse(decode_as(message_type, value)?),
        MessageType::Subscribe => Message::Subscribe(decode_as(message_type, value)?),
        MessageType::Unsubscribe => Message::Unsubscribe(decode_as(message_type, value)?),
        MessageType::Publish => Message::Publish(decode_as(message_type, value)?),
        MessageType::Topic => Message::Topic(decode_as(message_type, value)?),
        MessageType::RegisterService => Message::RegisterService(decode_as(message_type, value)?),
        MessageType::RegisterServiceResponse => {
            Message::RegisterServiceResponse(decode_as(message_type, value)?)
        }
        MessageType::Invoke => Message::Invoke(decode_as(message_type, value)?),
        MessageType::InvokeResponse => Message::InvokeResponse(decode_as(message_type, value)?),
        MessageType::UnregisterService => {
            Message::UnregisterService(decode_as(message_type, value)?)
        }
        MessageType::UnregisterServiceResponse => {
            Message::UnregisterServiceResponse(decode_as(message_type, value)?)
        }
    };

    Ok(message)
}

fn decode_as<T: DeserializeOwned>(
    message_type: MessageType,
    value: Value,
) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|source| CodecError::InvalidMessage {
        message_type,
        source,
    })
}

/// Limits applied while reassembling an inbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLimits {
    /// Largest single transport frame accepted; bigger frames are dropped as malformed.
    pub max_message_size: usize,

    /// Largest amount of undecoded input kept while waiting for a document to complete.
    /// Exceeding it is fatal to the connection.
    pub max_buffer_size: usize,

    /// Number of consecutive malformed frames tolerated before the connection is
    /// considered broken. Zero disables the check.
    pub max_malformed_frames: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            max_buffer_size: 4 * 1024 * 1024,
            max_malformed_frames: 16,
        }
    }
}

/// Accumulates inbound text and yields every complete message it holds.
///
/// A single frame may carry several JSON documents back to back, or only the
/// beginning of one. Incomplete trailing input is kept until the next frame arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    limits: FrameLimits,
    malformed: usize,
}

impl FrameDecoder {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            buffer: Vec::new(),
            limits,
            malformed: 0,
        }
    }

    /// Number of buffered bytes not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a frame and decodes as many messages as the buffer now holds.
    ///
    /// Malformed documents are logged and skipped. An error is returned only when the
    /// stream as a whole is beyond repair.
    pub fn push(&mut self, frame: &[u8]) -> Result<Vec<Message>, CodecError> {
        if frame.len() > self.limits.max_message_size {
            warn!(
                "⚠️ Dropping frame of {} bytes (limit {})",
                frame.len(),
                self.limits.max_message_size
            );
            self.record_malformed()?;
            return Ok(Vec::new());
        }

        self.buffer.extend_from_slice(frame);
        if self.buffer.len() > self.limits.max_buffer_size {
            return Err(CodecError::BufferOverflow {
                size: self.buffer.len(),
                limit: self.limits.max_buffer_size,
            });
        }

        let mut messages = Vec::new();
        let mut consumed = 0;
        let mut malformed = 0;
        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();

        loop {
            match stream.next() {
                None => {
                    consumed = self.buffer.len();
                    break;
                }
                Some(Ok(value)) => {
                    consumed = stream.byte_offset();
                    match decode_value(value) {
                        Ok(message) => {
                            trace!("Decoded {} message", message.message_type());
                            messages.push(message);
                        }
                        Err(e) => {
                            warn!("⚠️ Skipping malformed message: {}", e);
                            malformed += 1;
                        }
                    }
                }
                Some(Err(e)) if e.is_eof() => {
                    consumed = stream.byte_offset();
                    break;
                }
                Some(Err(e)) => {
                    warn!(
                        "⚠️ Discarding {} bytes of unparsable input: {}",
                        self.buffer.len() - consumed,
                        e
                    );
                    malformed += 1;
                    consumed = self.buffer.len();
                    break;
                }
            }
        }

        self.buffer.drain(..consumed);

        if malformed == 0 {
            if !messages.is_empty() {
                self.malformed = 0;
            }
        } else {
            for _ in 0..malformed {
                self.record_malformed()?;
            }
        }

        Ok(messages)
    }

    fn record_malformed(&mut self) -> Result<(), CodecError> {
        self.malformed += 1;
        let limit = self.limits.max_malformed_frames;
        if limit > 0 && self.malformed > limit {
            return Err(CodecError::TooManyMalformedFrames {
                count: self.malformed,
            });
        }
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(FrameLimits::default())
    }
}
