//! The message set exchanged between clients and the broker.

use crate::error::ErrorInfo;
use crate::protocol::{MessageBuffer, MessageScope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminator carried in the `type` field of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Connect,
    ConnectResponse,
    Subscribe,
    Unsubscribe,
    Publish,
    Topic,
    RegisterService,
    RegisterServiceResponse,
    Invoke,
    InvokeResponse,
    UnregisterService,
    UnregisterServiceResponse,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "Connect",
            MessageType::ConnectResponse => "ConnectResponse",
            MessageType::Subscribe => "Subscribe",
            MessageType::Unsubscribe => "Unsubscribe",
            MessageType::Publish => "Publish",
            MessageType::Topic => "Topic",
            MessageType::RegisterService => "RegisterService",
            MessageType::RegisterServiceResponse => "RegisterServiceResponse",
            MessageType::Invoke => "Invoke",
            MessageType::InvokeResponse => "InvokeResponse",
            MessageType::UnregisterService => "UnregisterService",
            MessageType::UnregisterServiceResponse => "UnregisterServiceResponse",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Answer to [`ConnectRequest`]; `client_id` is absent when `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeMessage {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeMessage {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessage {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessageBuffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<MessageScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Server push delivering a published message to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessageBuffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<MessageScope>,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServiceRequest {
    pub request_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServiceResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterServiceRequest {
    pub request_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterServiceResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub request_id: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessageBuffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<MessageScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessageBuffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// A protocol message.
///
/// Serializes as a flat JSON object whose `type` field names the variant. Decoding
/// goes through [`crate::codec`], which locates `type` wherever it sits in the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Message {
    Connect(ConnectRequest),
    ConnectResponse(ConnectResponse),
    Subscribe(SubscribeMessage),
    Unsubscribe(UnsubscribeMessage),
    Publish(PublishMessage),
    Topic(TopicMessage),
    RegisterService(RegisterServiceRequest),
    RegisterServiceResponse(RegisterServiceResponse),
    Invoke(InvokeRequest),
    InvokeResponse(InvokeResponse),
    UnregisterService(UnregisterServiceRequest),
    UnregisterServiceResponse(UnregisterServiceResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Connect(_) => MessageType::Connect,
            Message::ConnectResponse(_) => MessageType::ConnectResponse,
            Message::Subscribe(_) => MessageType::Subscribe,
            Message::Unsubscribe(_) => MessageType::Unsubscribe,
            Message::Publish(_) => MessageType::Publish,
            Message::Topic(_) => MessageType::Topic,
            Message::RegisterService(_) => MessageType::RegisterService,
            Message::RegisterServiceResponse(_) => MessageType::RegisterServiceResponse,
            Message::Invoke(_) => MessageType::Invoke,
            Message::InvokeResponse(_) => MessageType::InvokeResponse,
            Message::UnregisterService(_) => MessageType::UnregisterService,
            Message::UnregisterServiceResponse(_) => MessageType::UnregisterServiceResponse,
        }
    }

    /// The request id of request- and response-shaped messages.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Message::RegisterService(m) => Some(&m.request_id),
            Message::RegisterServiceResponse(m) => Some(&m.request_id),
            Message::UnregisterService(m) => Some(&m.request_id),
            Message::UnregisterServiceResponse(m) => Some(&m.request_id),
            Message::Invoke(m) => Some(&m.request_id),
            Message::InvokeResponse(m) => Some(&m.request_id),
            _ => None,
        }
    }

    /// The error carried by a response, if any.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Message::ConnectResponse(m) => m.error.as_ref(),
            Message::RegisterServiceResponse(m) => m.error.as_ref(),
            Message::UnregisterServiceResponse(m) => m.error.as_ref(),
            Message::InvokeResponse(m) => m.error.as_ref(),
            _ => None,
        }
    }
}

macro_rules! impl_from_message {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Message {
                fn from(message: $ty) -> Self {
                    Message::$variant(message)
                }
            }
        )*
    };
}

impl_from_message!(
    Connect(ConnectRequest),
    ConnectResponse(ConnectResponse),
    Subscribe(SubscribeMessage),
    Unsubscribe(UnsubscribeMessage),
    Publish(PublishMessage),
    Topic(TopicMessage),
    RegisterService(RegisterServiceRequest),
    RegisterServiceResponse(RegisterServiceResponse),
    Invoke(InvokeRequest),
    InvokeResponse(InvokeResponse),
    UnregisterService(UnregisterServiceRequest),
    UnregisterServiceResponse(UnregisterServiceResponse),
);
