//! The client multiplexer.
//!
//! A [`MessageRouterClient`] runs many logical operations over one duplex
//! channel to the broker. Outbound requests carry a locally unique request id
//! and park a one-shot entry in the [`CallbackRegistry`]; a single reader task
//! per connection matches every inbound message to its entry.

use crate::callbacks::{Callback, CallbackEntry, CallbackRegistry, OperationKey};
use crate::handlers::{service_error_info, ServiceHandler, TopicSubscriber};
use crate::options::ClientOptions;
use crate::state::{ClientEvent, ClientState};
use router_core::protocol::{
    validate_endpoint, validate_topic, ConnectRequest, InvokeRequest, InvokeResponse, Message,
    MessageBuffer, MessageScope, PublishMessage, RegisterServiceRequest, SubscribeMessage,
    UnregisterServiceRequest, UnsubscribeMessage,
};
use router_core::{
    ChannelError, Connector, DuplexChannel, RouterError, WebSocketConnector, URL_ENV_VAR,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn};

const EVENT_CAPACITY: usize = 64;

/// Handle returned by [`MessageRouterClient::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct Shared {
    state: ClientState,
    options: ClientOptions,
    channel: Option<Arc<dyn DuplexChannel>>,
    /// Incremented on every connect attempt and every teardown. Tasks tied to an
    /// older connection compare against it before touching shared state.
    generation: u64,
    callbacks: CallbackRegistry,
}

struct ClientInner {
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    connect_lock: AsyncMutex<()>,
    subscription_lock: AsyncMutex<()>,
    next_request_id: AtomicU64,
    next_entry_id: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientInner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_entry_id(&self) -> u64 {
        self.next_entry_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set_state(&self, shared: &mut Shared, state: ClientState) {
        if shared.state != state {
            trace!("Client state {} -> {}", shared.state, state);
            shared.state = state;
            let _ = self.events.send(ClientEvent::StateChanged(state));
        }
    }

    fn connected_channel(&self) -> Option<Arc<dyn DuplexChannel>> {
        let shared = self.shared();
        match shared.state {
            ClientState::Connected => shared.channel.clone(),
            _ => None,
        }
    }

    /// Moves to `Closed` and fails everything that was waiting on the connection.
    ///
    /// With `Some(generation)` nothing happens unless that connection is still the
    /// current one. `error` is `None` for a close the application asked for.
    async fn teardown(&self, generation: Option<u64>, error: Option<RouterError>) {
        let (channel, drained) = {
            let mut shared = self.shared();
            if generation.is_some_and(|generation| generation != shared.generation) {
                return;
            }
            if shared.state == ClientState::Closed {
                return;
            }
            shared.generation += 1;
            self.set_state(&mut shared, ClientState::Closed);
            (shared.channel.take(), shared.callbacks.drain())
        };

        let failure = error.clone().unwrap_or_else(RouterError::connection_closed);
        for (_, entry) in drained {
            match entry.callback {
                Callback::Response(sender) => {
                    let _ = sender.send(Err(failure.clone()));
                }
                Callback::Topic(subscriber) => subscriber.on_error(&failure),
                Callback::Service(_) => {}
            }
        }

        if let Some(channel) = channel {
            channel.close().await;
        }
        match &error {
            Some(e) => warn!("🔌 Message router connection lost: {}", e),
            None => info!("Message router connection closed"),
        }
        let _ = self.events.send(ClientEvent::Closed { error });
    }

    /// Handles one inbound message. An `Err` is a protocol violation that ends
    /// the connection.
    fn dispatch(
        &self,
        channel: &Arc<dyn DuplexChannel>,
        message: Message,
    ) -> Result<(), RouterError> {
        trace!("Client received {}", message.message_type());
        match message {
            Message::ConnectResponse(_) => {
                self.complete(&OperationKey::connect(), message);
            }
            Message::RegisterServiceResponse(_)
            | Message::UnregisterServiceResponse(_)
            | Message::InvokeResponse(_) => {
                let key = OperationKey::request(message.request_id().unwrap_or_default());
                self.complete(&key, message);
            }
            Message::Topic(update) => {
                let subscribers = self.shared().callbacks.topic_subscribers(&update.topic);
                if subscribers.is_empty() {
                    trace!("No local subscribers for '{}'", update.topic);
                }
                for subscriber in subscribers {
                    subscriber.on_next(&update);
                }
            }
            Message::Invoke(request) => {
                let handler = self.shared().callbacks.service(&request.endpoint);
                tokio::spawn(serve_invocation(channel.clone(), handler, request));
            }
            unexpected => {
                return Err(RouterError::connection_aborted(format!(
                    "unexpected {} message from the broker",
                    unexpected.message_type()
                )));
            }
        }
        Ok(())
    }

    fn complete(&self, key: &OperationKey, message: Message) {
        let entry = self.shared().callbacks.take_one_shot(key);
        match entry.map(|entry| entry.callback) {
            Some(Callback::Response(sender)) => {
                let _ = sender.send(Ok(message));
            }
            Some(_) => warn!("Callback for {:?} is not awaiting a response", key),
            None => debug!("Discarding {} with no pending operation", message.message_type()),
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let channel = match self.shared.get_mut() {
            Ok(shared) => shared.channel.take(),
            Err(poisoned) => poisoned.into_inner().channel.take(),
        };
        if let (Some(channel), Ok(runtime)) = (channel, tokio::runtime::Handle::try_current()) {
            runtime.spawn(async move { channel.close().await });
        }
    }
}

/// Removes a callback entry when dropped, unless disarmed.
struct EntryGuard<'a> {
    inner: &'a ClientInner,
    key: OperationKey,
    entry_id: u64,
    armed: bool,
}

impl EntryGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.shared().callbacks.remove(&self.key, self.entry_id);
        }
    }
}

async fn read_loop(inner: Weak<ClientInner>, channel: Arc<dyn DuplexChannel>, generation: u64) {
    loop {
        let received = channel.receive().await;
        let Some(inner) = inner.upgrade() else {
            channel.close().await;
            return;
        };

        let failure = match received {
            Ok(message) => match inner.dispatch(&channel, message) {
                Ok(()) => continue,
                Err(violation) => violation,
            },
            Err(ChannelError::Closed) => RouterError::connection_closed(),
            Err(e) => RouterError::from(e),
        };
        inner.teardown(Some(generation), Some(failure)).await;
        return;
    }
}

async fn serve_invocation(
    channel: Arc<dyn DuplexChannel>,
    handler: Option<Arc<dyn ServiceHandler>>,
    request: InvokeRequest,
) {
    let request_id = request.request_id.clone();
    let endpoint = request.endpoint.clone();

    let response = match handler {
        Some(handler) => match handler.handle(request).await {
            Ok(payload) => InvokeResponse {
                request_id,
                payload,
                error: None,
            },
            Err(e) => {
                debug!("Service '{}' failed: {:#}", endpoint, e);
                InvokeResponse {
                    request_id,
                    payload: None,
                    error: Some(service_error_info(&e)),
                }
            }
        },
        None => {
            warn!("⚠️ Invoke for '{}', which this client does not serve", endpoint);
            InvokeResponse {
                request_id,
                payload: None,
                error: Some(RouterError::unknown_endpoint(&endpoint).to_info()),
            }
        }
    };

    if let Err(e) = channel.send(response.into()).await {
        debug!("Could not answer invoke of '{}': {}", endpoint, e);
    }
}

/// Client side of the message router.
///
/// Cheap to clone; clones share one connection. Operations other than
/// [`connect`](Self::connect) connect on demand. Nothing reconnects
/// automatically: after the connection is lost, the next operation (or an
/// explicit `connect`) starts a new one, presenting the previous client id.
/// Subscriptions and services do not survive a lost connection and must be
/// set up again.
#[derive(Clone)]
pub struct MessageRouterClient {
    inner: Arc<ClientInner>,
}

impl MessageRouterClient {
    pub fn new(connector: Arc<dyn Connector>, options: ClientOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                connector,
                shared: Mutex::new(Shared {
                    state: ClientState::Created,
                    options,
                    channel: None,
                    generation: 0,
                    callbacks: CallbackRegistry::default(),
                }),
                connect_lock: AsyncMutex::new(()),
                subscription_lock: AsyncMutex::new(()),
                next_request_id: AtomicU64::new(1),
                next_entry_id: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// A client for the broker at a `ws://` URL.
    pub fn websocket(url: impl Into<String>, options: ClientOptions) -> Self {
        Self::new(Arc::new(WebSocketConnector::new(url)), options)
    }

    /// A client for the broker a launcher pointed this process at.
    pub fn from_env() -> Result<Self, RouterError> {
        let url = std::env::var(URL_ENV_VAR)
            .map_err(|_| RouterError::connection_failed(format!("{URL_ENV_VAR} is not set")))?;
        Ok(Self::websocket(url, ClientOptions::from_env()))
    }

    pub fn state(&self) -> ClientState {
        self.inner.shared().state
    }

    /// The id the broker assigned on the most recent successful connect.
    pub fn client_id(&self) -> Option<String> {
        self.inner.shared().options.client_id.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Opens the connection and performs the `Connect` handshake.
    ///
    /// Returns the assigned client id. Already connected clients return their
    /// current id; concurrent calls share one attempt.
    pub async fn connect(&self) -> Result<String, RouterError> {
        let _connecting = self.inner.connect_lock.lock().await;

        let (generation, request) = {
            let mut shared = self.inner.shared();
            if shared.state == ClientState::Connected {
                if let Some(client_id) = shared.options.client_id.clone() {
                    return Ok(client_id);
                }
            }
            shared.generation += 1;
            self.inner.set_state(&mut shared, ClientState::WsConnecting);
            let request = ConnectRequest {
                client_id: shared.options.client_id.clone(),
                access_token: shared.options.access_token.clone(),
            };
            (shared.generation, request)
        };

        let channel = match self.inner.connector.connect().await {
            Ok(channel) => channel,
            Err(e) => {
                let error = RouterError::from(e);
                self.inner.teardown(Some(generation), Some(error.clone())).await;
                return Err(error);
            }
        };

        let (sender, receiver) = oneshot::channel();
        let current = {
            let mut shared = self.inner.shared();
            let current = shared.generation == generation;
            if current {
                shared.channel = Some(channel.clone());
                shared.callbacks.add(
                    OperationKey::connect(),
                    CallbackEntry {
                        id: self.inner.next_entry_id(),
                        callback: Callback::Response(sender),
                        one_shot: true,
                    },
                );
                self.inner.set_state(&mut shared, ClientState::ClientConnecting);
            }
            current
        };
        if !current {
            channel.close().await;
            return Err(RouterError::connection_closed());
        }

        tokio::spawn(read_loop(Arc::downgrade(&self.inner), channel.clone(), generation));
        debug!("Transport to {} open, sending Connect", channel.peer());

        if let Err(e) = channel.send(request.into()).await {
            let error = RouterError::from(e);
            self.inner.teardown(Some(generation), Some(error.clone())).await;
            return Err(error);
        }

        let response = match receiver.await {
            Ok(Ok(Message::ConnectResponse(response))) => response,
            Ok(Ok(other)) => {
                let error = RouterError::connection_aborted(format!(
                    "expected ConnectResponse, got {}",
                    other.message_type()
                ));
                self.inner.teardown(Some(generation), Some(error.clone())).await;
                return Err(error);
            }
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(RouterError::connection_closed()),
        };

        let client_id = match (response.error, response.client_id) {
            (Some(error), _) => {
                let error = RouterError::from(error);
                self.inner.teardown(Some(generation), Some(error.clone())).await;
                return Err(error);
            }
            (None, Some(client_id)) => client_id,
            (None, None) => {
                let error = RouterError::connection_aborted("ConnectResponse carried no client id");
                self.inner.teardown(Some(generation), Some(error.clone())).await;
                return Err(error);
            }
        };

        {
            let mut shared = self.inner.shared();
            if shared.generation != generation {
                return Err(RouterError::connection_closed());
            }
            shared.options.client_id = Some(client_id.clone());
            self.inner.set_state(&mut shared, ClientState::Connected);
        }
        info!("🔗 Connected to message router as {}", client_id);
        let _ = self.inner.events.send(ClientEvent::Connected {
            client_id: client_id.clone(),
        });
        Ok(client_id)
    }

    /// Closes the connection. Pending operations fail with `ConnectionClosed` and
    /// topic subscribers are told through `on_error`.
    pub async fn close(&self) {
        self.inner.teardown(None, None).await;
    }

    async fn ensure_connected(&self) -> Result<Arc<dyn DuplexChannel>, RouterError> {
        if let Some(channel) = self.inner.connected_channel() {
            return Ok(channel);
        }
        self.connect().await?;
        self.inner
            .connected_channel()
            .ok_or_else(RouterError::connection_closed)
    }

    /// Sends a request-shaped message built around a fresh request id and waits
    /// for the matching response.
    async fn request<F>(&self, build: F) -> Result<Message, RouterError>
    where
        F: FnOnce(String) -> Message,
    {
        let channel = self.ensure_connected().await?;
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed).to_string();
        let key = OperationKey::request(&request_id);
        let entry_id = self.inner.next_entry_id();
        let (sender, receiver) = oneshot::channel();

        self.inner.shared().callbacks.add(
            key.clone(),
            CallbackEntry {
                id: entry_id,
                callback: Callback::Response(sender),
                one_shot: true,
            },
        );
        let _pending = EntryGuard {
            inner: &self.inner,
            key,
            entry_id,
            armed: true,
        };

        channel.send(build(request_id)).await?;
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(RouterError::connection_closed()),
        }
    }

    /// Registers `subscriber` for messages published to `topic`.
    ///
    /// Only the first local subscriber of a topic sends `Subscribe` to the broker.
    pub async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn TopicSubscriber>,
    ) -> Result<Subscription, RouterError> {
        validate_topic(topic)?;
        let channel = self.ensure_connected().await?;
        let _ordering = self.inner.subscription_lock.lock().await;

        let key = OperationKey::topic(topic);
        let id = self.inner.next_entry_id();
        let count = self.inner.shared().callbacks.add(
            key.clone(),
            CallbackEntry {
                id,
                callback: Callback::Topic(subscriber),
                one_shot: false,
            },
        );

        if count == 1 {
            debug!("📥 Subscribing to '{}'", topic);
            let subscribe = SubscribeMessage {
                topic: topic.to_string(),
            };
            if let Err(e) = channel.send(subscribe.into()).await {
                self.inner.shared().callbacks.remove(&key, id);
                return Err(e.into());
            }
        }

        Ok(Subscription {
            topic: topic.to_string(),
            id,
        })
    }

    /// Removes one subscriber. The last local subscriber of a topic sends
    /// `Unsubscribe`. Unknown subscriptions are ignored.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), RouterError> {
        let _ordering = self.inner.subscription_lock.lock().await;

        let removed = self
            .inner
            .shared()
            .callbacks
            .remove(&OperationKey::topic(&subscription.topic), subscription.id);
        let Some((_, 0)) = removed else {
            return Ok(());
        };

        let Some(channel) = self.inner.connected_channel() else {
            return Ok(());
        };
        debug!("📤 Unsubscribing from '{}'", subscription.topic);
        channel
            .send(
                UnsubscribeMessage {
                    topic: subscription.topic.clone(),
                }
                .into(),
            )
            .await?;
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Option<MessageBuffer>,
    ) -> Result<(), RouterError> {
        self.publish_message(PublishMessage {
            topic: topic.to_string(),
            payload,
            scope: None,
            correlation_id: None,
        })
        .await
    }

    pub async fn publish_message(&self, message: PublishMessage) -> Result<(), RouterError> {
        validate_topic(&message.topic)?;
        let channel = self.ensure_connected().await?;
        channel.send(message.into()).await?;
        Ok(())
    }

    /// Calls the service registered under `endpoint` and returns its reply.
    ///
    /// Dropping the returned future abandons the call; a late reply is discarded.
    pub async fn invoke(
        &self,
        endpoint: &str,
        payload: Option<MessageBuffer>,
    ) -> Result<Option<MessageBuffer>, RouterError> {
        self.invoke_in_scope(endpoint, payload, None).await
    }

    /// Like [`invoke`](Self::invoke), with a scope attached. A scope naming a
    /// client (see [`MessageScope::from_client_id`]) sends the call to that
    /// client's local endpoint instead of the registered owner.
    pub async fn invoke_in_scope(
        &self,
        endpoint: &str,
        payload: Option<MessageBuffer>,
        scope: Option<MessageScope>,
    ) -> Result<Option<MessageBuffer>, RouterError> {
        validate_endpoint(endpoint)?;

        let response = self
            .request(|request_id| {
                InvokeRequest {
                    request_id,
                    endpoint: endpoint.to_string(),
                    payload,
                    scope,
                    source_id: None,
                    correlation_id: None,
                }
                .into()
            })
            .await?;

        match response {
            Message::InvokeResponse(InvokeResponse { error: Some(error), .. }) => Err(error.into()),
            Message::InvokeResponse(response) => Ok(response.payload),
            other => Err(RouterError::connection_aborted(format!(
                "expected InvokeResponse, got {}",
                other.message_type()
            ))),
        }
    }

    /// Like [`invoke`](Self::invoke), failing with [`RouterError::Cancelled`] as
    /// soon as `cancel` completes.
    pub async fn invoke_with_cancellation<C>(
        &self,
        endpoint: &str,
        payload: Option<MessageBuffer>,
        cancel: C,
    ) -> Result<Option<MessageBuffer>, RouterError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.invoke(endpoint, payload) => result,
            _ = cancel => {
                debug!("Invoke of '{}' cancelled", endpoint);
                Err(RouterError::Cancelled)
            }
        }
    }

    /// Claims `endpoint` at the broker and serves its invocations with `handler`.
    ///
    /// Fails with `DuplicateEndpoint` if this client or any other already owns it.
    pub async fn register_service(
        &self,
        endpoint: &str,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<(), RouterError> {
        validate_endpoint(endpoint)?;
        self.ensure_connected().await?;

        let key = OperationKey::invoke(endpoint);
        let entry_id = self.inner.next_entry_id();
        {
            let mut shared = self.inner.shared();
            if shared.callbacks.count(&key) > 0 {
                return Err(RouterError::duplicate_endpoint(endpoint));
            }
            shared.callbacks.add(
                key.clone(),
                CallbackEntry {
                    id: entry_id,
                    callback: Callback::Service(handler),
                    one_shot: false,
                },
            );
        }
        let registration = EntryGuard {
            inner: &self.inner,
            key,
            entry_id,
            armed: true,
        };

        let response = self
            .request(|request_id| {
                RegisterServiceRequest {
                    request_id,
                    endpoint: endpoint.to_string(),
                }
                .into()
            })
            .await?;

        match response {
            Message::RegisterServiceResponse(response) => match response.error {
                Some(error) => Err(error.into()),
                None => {
                    registration.disarm();
                    info!("🛠️ Serving endpoint '{}'", endpoint);
                    Ok(())
                }
            },
            other => Err(RouterError::connection_aborted(format!(
                "expected RegisterServiceResponse, got {}",
                other.message_type()
            ))),
        }
    }

    /// Like [`register_service`](Self::register_service), failing with
    /// [`RouterError::Cancelled`] as soon as `cancel` completes. A cancelled
    /// registration is not served locally even if the broker accepts it.
    pub async fn register_service_with_cancellation<C>(
        &self,
        endpoint: &str,
        handler: Arc<dyn ServiceHandler>,
        cancel: C,
    ) -> Result<(), RouterError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.register_service(endpoint, handler) => result,
            _ = cancel => {
                debug!("Registration of '{}' cancelled", endpoint);
                Err(RouterError::Cancelled)
            }
        }
    }

    /// Stops serving `endpoint` and releases it at the broker.
    pub async fn unregister_service(&self, endpoint: &str) -> Result<(), RouterError> {
        validate_endpoint(endpoint)?;

        let key = OperationKey::invoke(endpoint);
        let was_serving = self.inner.shared().callbacks.remove_all(&key) > 0;
        if !was_serving || self.inner.connected_channel().is_none() {
            return Ok(());
        }

        let response = self
            .request(|request_id| {
                UnregisterServiceRequest {
                    request_id,
                    endpoint: endpoint.to_string(),
                }
                .into()
            })
            .await?;

        match response.error() {
            Some(error) => Err(error.into()),
            None => {
                info!("Stopped serving endpoint '{}'", endpoint);
                Ok(())
            }
        }
    }

    /// Serves `endpoint` on this client only, without claiming it at the broker.
    ///
    /// Other clients reach it by invoking with this client's id as the scope.
    /// Fails with `DuplicateEndpoint` if this client already serves `endpoint`.
    pub async fn register_endpoint(
        &self,
        endpoint: &str,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<(), RouterError> {
        validate_endpoint(endpoint)?;
        self.ensure_connected().await?;

        let key = OperationKey::invoke(endpoint);
        let mut shared = self.inner.shared();
        if shared.callbacks.count(&key) > 0 {
            return Err(RouterError::duplicate_endpoint(endpoint));
        }
        shared.callbacks.add(
            key,
            CallbackEntry {
                id: self.inner.next_entry_id(),
                callback: Callback::Service(handler),
                one_shot: false,
            },
        );
        debug!("🛠️ Serving local endpoint '{}'", endpoint);
        Ok(())
    }

    /// Stops serving a local endpoint. Unknown endpoints are ignored.
    pub async fn unregister_endpoint(&self, endpoint: &str) -> Result<(), RouterError> {
        validate_endpoint(endpoint)?;
        if self.inner.shared().callbacks.remove_all(&OperationKey::invoke(endpoint)) > 0 {
            debug!("Stopped serving local endpoint '{}'", endpoint);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MessageRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared();
        f.debug_struct("MessageRouterClient")
            .field("state", &shared.state)
            .field("client_id", &shared.options.client_id)
            .finish()
    }
}
