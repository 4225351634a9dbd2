//! Shared routing state and the operations that mutate it.
//!
//! The [`Broker`] owns the client registry, the topic subscription table, the
//! endpoint registry and the pending invocation table. Every mutation happens
//! under one write lock, so registration is atomic and a publish always fans out
//! to a consistent subscriber set. Nothing here awaits while holding the lock:
//! delivery is a non-blocking enqueue onto the target's outbound queue.

use crate::config::ServerConfig;
use crate::connection::{ClientId, ClientLink, ClientSession, Delivery};
use crate::security::{AccessTokenValidator, StaticTokenValidator};
use router_core::protocol::{
    validate_endpoint, validate_topic, ConnectRequest, InvokeRequest, InvokeResponse, MessageScope,
    PublishMessage, TopicMessage,
};
use router_core::{ChannelId, ErrorKind, RouterError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Disconnected client ids kept reclaimable before the oldest are forgotten.
pub const DEFAULT_RETIRED_ID_CAPACITY: usize = 10_000;

/// An `Invoke` forwarded to a service owner and not yet answered.
#[derive(Debug, Clone)]
struct PendingInvocation {
    caller: ClientId,
    /// The id the caller chose; restored on the routed response.
    caller_request_id: String,
    callee: ClientId,
    endpoint: String,
}

#[derive(Debug)]
struct RouterState {
    clients: HashMap<ClientId, ClientSession>,
    topics: HashMap<String, HashSet<ClientId>>,
    endpoints: HashMap<String, ClientId>,
    /// Keyed by the routing id the broker put on the forwarded `Invoke`.
    invocations: HashMap<String, PendingInvocation>,
    /// `(caller, caller request id)` to routing id.
    by_caller: HashMap<(ClientId, String), String>,
    /// Ids a client may present to get the same identity back: every live id
    /// plus the most recently disconnected ones.
    issued_ids: HashSet<ClientId>,
    /// Disconnected ids in the order they left, oldest first.
    retired_ids: VecDeque<ClientId>,
    retired_id_capacity: usize,
}

impl RouterState {
    fn new(retired_id_capacity: usize) -> Self {
        Self {
            clients: HashMap::new(),
            topics: HashMap::new(),
            endpoints: HashMap::new(),
            invocations: HashMap::new(),
            by_caller: HashMap::new(),
            issued_ids: HashSet::new(),
            retired_ids: VecDeque::new(),
            retired_id_capacity,
        }
    }

    /// Keeps a departed id reclaimable, forgetting the oldest beyond capacity.
    fn retire_id(&mut self, client_id: &str) {
        self.retired_ids.push_back(client_id.to_string());
        while self.retired_ids.len() > self.retired_id_capacity {
            let Some(oldest) = self.retired_ids.pop_front() else {
                break;
            };
            if !self.clients.contains_key(&oldest) && !self.retired_ids.contains(&oldest) {
                self.issued_ids.remove(&oldest);
            }
        }
    }

    /// Removes a session and everything it holds. Returns the removed session.
    fn remove_session(&mut self, client_id: &str) -> Option<ClientSession> {
        let session = self.clients.remove(client_id)?;

        for topic in &session.subscriptions {
            if let Some(members) = self.topics.get_mut(topic) {
                members.remove(client_id);
                if members.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }

        for endpoint in &session.endpoints {
            if self.endpoints.get(endpoint).map(String::as_str) == Some(client_id) {
                self.endpoints.remove(endpoint);
            }
        }

        let affected: Vec<String> = self
            .invocations
            .iter()
            .filter(|(_, pending)| pending.caller == client_id || pending.callee == client_id)
            .map(|(routing_id, _)| routing_id.clone())
            .collect();

        for routing_id in affected {
            let Some(pending) = self.invocations.remove(&routing_id) else {
                continue;
            };
            self.by_caller
                .remove(&(pending.caller.clone(), pending.caller_request_id.clone()));

            if pending.callee == client_id && pending.caller != client_id {
                let error = RouterError::new(
                    ErrorKind::ConnectionClosed,
                    format!("The owner of '{}' disconnected before responding", pending.endpoint),
                );
                if let Some(caller) = self.clients.get(&pending.caller) {
                    caller.link.deliver(
                        InvokeResponse {
                            request_id: pending.caller_request_id,
                            payload: None,
                            error: Some(error.to_info()),
                        }
                        .into(),
                    );
                }
            }
        }

        Some(session)
    }
}

/// The message router's server core.
pub struct Broker {
    state: RwLock<RouterState>,
    validator: Option<Arc<dyn AccessTokenValidator>>,
    max_connections: usize,
}

impl Broker {
    /// Creates a broker that enforces the limits and access token in `config`.
    pub fn new(config: &ServerConfig) -> Self {
        let validator = config.access_token.as_ref().map(|token| {
            Arc::new(StaticTokenValidator::new(token.clone())) as Arc<dyn AccessTokenValidator>
        });
        Self::with_validator(config.max_connections, validator)
    }

    pub fn with_validator(
        max_connections: usize,
        validator: Option<Arc<dyn AccessTokenValidator>>,
    ) -> Self {
        Self {
            state: RwLock::new(RouterState::new(DEFAULT_RETIRED_ID_CAPACITY)),
            validator,
            max_connections,
        }
    }

    /// Sets how many disconnected ids stay reclaimable by a reconnecting client.
    pub fn with_retired_id_capacity(mut self, capacity: usize) -> Self {
        self.state.get_mut().retired_id_capacity = capacity;
        self
    }

    /// Admits a client and returns its id.
    ///
    /// A presented id that this broker issued is handed back. If a session still
    /// holds that id, the reconnecting client takes it over: the old session is
    /// torn down and its connection closed. Any other presented id is replaced by
    /// a new one.
    pub async fn connect(
        &self,
        link: ClientLink,
        request: ConnectRequest,
    ) -> Result<ClientId, RouterError> {
        if let Some(validator) = &self.validator {
            validator
                .validate(request.client_id.as_deref(), request.access_token.as_deref())
                .await?;
        }

        let mut state = self.state.write().await;

        let reclaimed = request
            .client_id
            .filter(|prior| state.issued_ids.contains(prior));
        let replacing = reclaimed
            .as_ref()
            .is_some_and(|prior| state.clients.contains_key(prior));

        let open = state.clients.len() - usize::from(replacing);
        if open >= self.max_connections {
            warn!(
                "🚫 Refusing client from {}: {} connections already open",
                link.peer(),
                open
            );
            return Err(RouterError::connection_failed(format!(
                "the broker accepts at most {} connections",
                self.max_connections
            )));
        }

        let client_id = match reclaimed {
            Some(prior) => {
                if let Some(previous) = state.remove_session(&prior) {
                    debug!(
                        "Client {} reconnected from {}; closing its connection from {}",
                        prior,
                        link.peer(),
                        previous.link.peer()
                    );
                    if previous.link.channel_id() != link.channel_id() {
                        tokio::spawn(async move { previous.link.close().await });
                    }
                }
                prior
            }
            None => {
                let client_id = Uuid::new_v4().to_string();
                state.issued_ids.insert(client_id.clone());
                client_id
            }
        };

        info!("🔗 Client {} connected from {}", client_id, link.peer());
        state
            .clients
            .insert(client_id.clone(), ClientSession::new(client_id.clone(), link));
        Ok(client_id)
    }

    pub async fn subscribe(&self, client_id: &str, topic: &str) -> Result<(), RouterError> {
        validate_topic(topic)?;

        let mut state = self.state.write().await;
        let Some(session) = state.clients.get_mut(client_id) else {
            return Err(RouterError::connection_closed());
        };
        session.subscriptions.insert(topic.to_string());
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(client_id.to_string());

        debug!("📥 Client {} subscribed to '{}'", client_id, topic);
        Ok(())
    }

    pub async fn unsubscribe(&self, client_id: &str, topic: &str) {
        let mut state = self.state.write().await;
        if let Some(session) = state.clients.get_mut(client_id) {
            session.subscriptions.remove(topic);
        }
        if let Some(members) = state.topics.get_mut(topic) {
            members.remove(client_id);
            if members.is_empty() {
                state.topics.remove(topic);
            }
        }
        debug!("📤 Client {} unsubscribed from '{}'", client_id, topic);
    }

    /// Fans a publish out to every current subscriber of its topic, the publisher
    /// included. Returns the number of subscribers it was queued for.
    pub async fn publish(
        &self,
        source_id: &str,
        message: PublishMessage,
    ) -> Result<usize, RouterError> {
        validate_topic(&message.topic)?;

        let state = self.state.read().await;
        let Some(members) = state.topics.get(&message.topic) else {
            trace!("No subscribers for '{}'", message.topic);
            return Ok(0);
        };

        let mut delivered = 0;
        for member in members {
            let Some(session) = state.clients.get(member) else {
                continue;
            };
            let update = TopicMessage {
                topic: message.topic.clone(),
                payload: message.payload.clone(),
                scope: message.scope.clone(),
                source_id: source_id.to_string(),
                correlation_id: message.correlation_id.clone(),
            };
            if session.link.deliver(update.into()) == Delivery::Queued {
                delivered += 1;
            }
        }

        trace!("Published '{}' from {} to {} subscriber(s)", message.topic, source_id, delivered);
        Ok(delivered)
    }

    /// Records `client_id` as the owner of `endpoint`.
    ///
    /// Fails with `DuplicateEndpoint` whenever the endpoint already has an owner,
    /// including when that owner is the caller. The existing owner is untouched.
    pub async fn register_service(
        &self,
        client_id: &str,
        endpoint: &str,
    ) -> Result<(), RouterError> {
        validate_endpoint(endpoint)?;

        let mut state = self.state.write().await;
        if !state.clients.contains_key(client_id) {
            return Err(RouterError::connection_closed());
        }
        if let Some(owner) = state.endpoints.get(endpoint) {
            debug!(
                "Client {} tried to register '{}', already owned by {}",
                client_id, endpoint, owner
            );
            return Err(RouterError::duplicate_endpoint(endpoint));
        }

        state.endpoints.insert(endpoint.to_string(), client_id.to_string());
        if let Some(session) = state.clients.get_mut(client_id) {
            session.endpoints.insert(endpoint.to_string());
        }
        info!("🛠️ Client {} registered endpoint '{}'", client_id, endpoint);
        Ok(())
    }

    /// Releases `endpoint` if `client_id` owns it. Anything else is a no-op.
    pub async fn unregister_service(
        &self,
        client_id: &str,
        endpoint: &str,
    ) -> Result<(), RouterError> {
        validate_endpoint(endpoint)?;

        let mut state = self.state.write().await;
        if state.endpoints.get(endpoint).map(String::as_str) != Some(client_id) {
            trace!("Ignoring unregister of '{}' by non-owner {}", endpoint, client_id);
            return Ok(());
        }

        state.endpoints.remove(endpoint);
        if let Some(session) = state.clients.get_mut(client_id) {
            session.endpoints.remove(endpoint);
        }
        info!("Client {} unregistered endpoint '{}'", client_id, endpoint);
        Ok(())
    }

    /// Forwards an invocation to the endpoint's owner, or to the client named by
    /// an `@clientId` scope whether or not it registered the endpoint.
    ///
    /// The forwarded `Invoke` carries a routing id chosen by the broker and the
    /// caller's id as `sourceId`. An `Err` is answered to the caller straight away.
    pub async fn invoke(&self, caller: &str, request: InvokeRequest) -> Result<(), RouterError> {
        validate_endpoint(&request.endpoint)?;

        let mut state = self.state.write().await;
        let caller_key = (caller.to_string(), request.request_id.clone());
        if state.by_caller.contains_key(&caller_key) {
            return Err(RouterError::duplicate_request_id(&request.request_id));
        }

        let target = request.scope.as_ref().and_then(MessageScope::client_id);
        let callee = match target {
            Some(client_id) => {
                if !state.clients.contains_key(client_id) {
                    debug!(
                        "Client {} invoked '{}' on unknown client {}",
                        caller, request.endpoint, client_id
                    );
                    return Err(RouterError::unknown_client(client_id));
                }
                client_id.to_string()
            }
            None => match state.endpoints.get(&request.endpoint) {
                Some(owner) => owner.clone(),
                None => {
                    debug!("Client {} invoked unknown endpoint '{}'", caller, request.endpoint);
                    return Err(RouterError::unknown_endpoint(&request.endpoint));
                }
            },
        };
        let Some(owner) = state.clients.get(&callee) else {
            return Err(RouterError::unknown_endpoint(&request.endpoint));
        };

        let routing_id = Uuid::new_v4().to_string();
        let forwarded = InvokeRequest {
            request_id: routing_id.clone(),
            endpoint: request.endpoint.clone(),
            payload: request.payload,
            scope: None,
            source_id: Some(caller.to_string()),
            correlation_id: request.correlation_id,
        };
        if owner.link.deliver(forwarded.into()) != Delivery::Queued {
            return Err(RouterError::connection_closed());
        }

        trace!(
            "Routed invoke {} of '{}' from {} to {} as {}",
            request.request_id, request.endpoint, caller, callee, routing_id
        );
        state.invocations.insert(
            routing_id.clone(),
            PendingInvocation {
                caller: caller.to_string(),
                caller_request_id: request.request_id,
                callee,
                endpoint: request.endpoint,
            },
        );
        state.by_caller.insert(caller_key, routing_id);
        Ok(())
    }

    /// Routes a service's answer back to the client that invoked it.
    ///
    /// Responses for unknown routing ids, or sent by anyone other than the
    /// client the invocation went to, are discarded.
    pub async fn deliver_invoke_response(&self, responder: &str, response: InvokeResponse) {
        let mut state = self.state.write().await;

        match state.invocations.get(&response.request_id) {
            Some(pending) if pending.callee == responder => {}
            Some(_) => {
                warn!(
                    "⚠️ Client {} answered invocation {} it was not given",
                    responder, response.request_id
                );
                return;
            }
            None => {
                debug!(
                    "Discarding response {} from {} with no pending invocation",
                    response.request_id, responder
                );
                return;
            }
        }

        let Some(pending) = state.invocations.remove(&response.request_id) else {
            return;
        };
        state
            .by_caller
            .remove(&(pending.caller.clone(), pending.caller_request_id.clone()));

        if let Some(caller) = state.clients.get(&pending.caller) {
            caller.link.deliver(
                InvokeResponse {
                    request_id: pending.caller_request_id,
                    payload: response.payload,
                    error: response.error,
                }
                .into(),
            );
        }
    }

    /// Destroys the session of `client_id` if it is still bound to `channel_id`.
    ///
    /// Subscriptions and endpoints are released. Invocations routed to this client
    /// fail with `ConnectionClosed` at their callers; invocations it made are dropped.
    pub async fn disconnect(&self, client_id: &str, channel_id: ChannelId) {
        let mut state = self.state.write().await;
        let bound = state
            .clients
            .get(client_id)
            .is_some_and(|session| session.link.channel_id() == channel_id);
        if !bound {
            return;
        }

        if let Some(session) = state.remove_session(client_id) {
            state.retire_id(client_id);
            let lifetime = session.connected_at.elapsed().unwrap_or_default();
            info!(
                "❌ Client {} from {} disconnected after {:.1}s",
                client_id,
                session.link.peer(),
                lifetime.as_secs_f64()
            );
        }
    }

    /// Closes every connected client's channel.
    pub async fn close_all(&self) {
        let links: Vec<ClientLink> = {
            let state = self.state.read().await;
            state.clients.values().map(|session| session.link.clone()).collect()
        };
        if !links.is_empty() {
            info!("Closing {} client connection(s)", links.len());
        }
        for link in links {
            link.close().await;
        }
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.state.read().await.clients.contains_key(client_id)
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.state.read().await.topics.get(topic).map_or(0, HashSet::len)
    }

    pub async fn endpoint_owner(&self, endpoint: &str) -> Option<ClientId> {
        self.state.read().await.endpoints.get(endpoint).cloned()
    }

    pub async fn pending_invocations(&self) -> usize {
        self.state.read().await.invocations.len()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("max_connections", &self.max_connections)
            .field("access_checked", &self.validator.is_some())
            .finish()
    }
}
