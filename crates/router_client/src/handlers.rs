//! Application callbacks: topic subscribers and service handlers.

use async_trait::async_trait;
use router_core::protocol::{InvokeRequest, MessageBuffer, TopicMessage};
use router_core::{ErrorInfo, RouterError, SERVICE_ERROR_NAME};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives the messages published to a subscribed topic.
pub trait TopicSubscriber: Send + Sync {
    fn on_next(&self, message: &TopicMessage);

    /// Called once when the connection carrying the subscription is lost.
    fn on_error(&self, _error: &RouterError) {}
}

impl<F> TopicSubscriber for F
where
    F: Fn(&TopicMessage) + Send + Sync,
{
    fn on_next(&self, message: &TopicMessage) {
        self(message)
    }
}

/// Forwards topic messages into an unbounded channel.
///
/// The receiver ends when the subscription's connection is lost.
pub struct ChannelSubscriber {
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<TopicMessage>>>,
}

impl ChannelSubscriber {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TopicMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriber = Arc::new(Self {
            sender: std::sync::Mutex::new(Some(sender)),
        });
        (subscriber, receiver)
    }
}

impl TopicSubscriber for ChannelSubscriber {
    fn on_next(&self, message: &TopicMessage) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(message.clone());
        }
    }

    fn on_error(&self, _error: &RouterError) {
        match self.sender.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }
}

/// Serves invocations of an endpoint registered by this client.
///
/// Returning an error sends it back to the caller. An error that is a
/// [`RouterError`] keeps its name; anything else is reported as `ServiceError`.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: InvokeRequest) -> anyhow::Result<Option<MessageBuffer>>;
}

/// A [`ServiceHandler`] backed by an async closure. See [`service_fn`].
pub struct ServiceFn<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wraps an async closure as a [`ServiceHandler`].
///
/// ```rust
/// use router_client::service_fn;
///
/// let echo = service_fn(|request| async move { Ok(request.payload) });
/// # let _ = echo;
/// ```
pub fn service_fn<F, Fut>(f: F) -> Arc<ServiceFn<F, Fut>>
where
    F: Fn(InvokeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<MessageBuffer>>> + Send + 'static,
{
    Arc::new(ServiceFn {
        f,
        _future: PhantomData,
    })
}

#[async_trait]
impl<F, Fut> ServiceHandler for ServiceFn<F, Fut>
where
    F: Fn(InvokeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<MessageBuffer>>> + Send + 'static,
{
    async fn handle(&self, request: InvokeRequest) -> anyhow::Result<Option<MessageBuffer>> {
        (self.f)(request).await
    }
}

/// The wire form of an error raised by a service handler.
pub(crate) fn service_error_info(error: &anyhow::Error) -> ErrorInfo {
    match error.downcast_ref::<RouterError>() {
        Some(router_error) => router_error.to_info(),
        None => ErrorInfo::new(SERVICE_ERROR_NAME, format!("{error:#}")),
    }
}
