//! Dispatch of decoded client messages to broker operations.
//!
//! Each connection's serve loop hands every message it receives to
//! [`route_message`], in arrival order. Request-shaped messages are answered on
//! the same connection; protocol failures travel inside those answers.

use crate::broker::Broker;
use crate::connection::{ClientId, ClientLink};
use router_core::protocol::{
    ConnectRequest, ConnectResponse, InvokeResponse, Message, RegisterServiceResponse,
    UnregisterServiceResponse,
};
use tracing::{debug, trace, warn};

/// Routes one message from a connection.
///
/// `client_id` is the connection's session id, filled in by a successful
/// `Connect`. Until then every other message is dropped.
pub async fn route_message(
    broker: &Broker,
    link: &ClientLink,
    client_id: &mut Option<ClientId>,
    message: Message,
) {
    trace!("Routing {} from {}", message.message_type(), link.peer());

    if let Message::Connect(request) = message {
        handle_connect(broker, link, client_id, request).await;
        return;
    }

    let Some(source) = client_id.as_deref() else {
        warn!(
            "⚠️ Dropping {} from {}: the connection has not sent Connect",
            message.message_type(),
            link.peer()
        );
        return;
    };

    match message {
        Message::Subscribe(subscribe) => {
            if let Err(e) = broker.subscribe(source, &subscribe.topic).await {
                warn!("Ignoring subscribe from {}: {}", source, e);
            }
        }
        Message::Unsubscribe(unsubscribe) => {
            broker.unsubscribe(source, &unsubscribe.topic).await;
        }
        Message::Publish(publish) => {
            if let Err(e) = broker.publish(source, publish).await {
                warn!("Ignoring publish from {}: {}", source, e);
            }
        }
        Message::RegisterService(request) => {
            let error = broker
                .register_service(source, &request.endpoint)
                .await
                .err()
                .map(|e| e.to_info());
            link.deliver(
                RegisterServiceResponse {
                    request_id: request.request_id,
                    error,
                }
                .into(),
            );
        }
        Message::UnregisterService(request) => {
            let error = broker
                .unregister_service(source, &request.endpoint)
                .await
                .err()
                .map(|e| e.to_info());
            link.deliver(
                UnregisterServiceResponse {
                    request_id: request.request_id,
                    error,
                }
                .into(),
            );
        }
        Message::Invoke(request) => {
            let request_id = request.request_id.clone();
            if let Err(e) = broker.invoke(source, request).await {
                debug!("Invoke {} from {} failed: {}", request_id, source, e);
                link.deliver(
                    InvokeResponse {
                        request_id,
                        payload: None,
                        error: Some(e.to_info()),
                    }
                    .into(),
                );
            }
        }
        Message::InvokeResponse(response) => {
            broker.deliver_invoke_response(source, response).await;
        }
        unexpected => {
            warn!(
                "⚠️ Unexpected {} from client {}; only the broker sends it",
                unexpected.message_type(),
                source
            );
        }
    }
}

async fn handle_connect(
    broker: &Broker,
    link: &ClientLink,
    client_id: &mut Option<ClientId>,
    request: ConnectRequest,
) {
    if let Some(current) = client_id.as_ref() {
        debug!("Client {} sent Connect again", current);
        link.deliver(
            ConnectResponse {
                client_id: Some(current.clone()),
                error: None,
            }
            .into(),
        );
        return;
    }

    let response = match broker.connect(link.clone(), request).await {
        Ok(assigned) => {
            *client_id = Some(assigned.clone());
            ConnectResponse {
                client_id: Some(assigned),
                error: None,
            }
        }
        Err(e) => {
            warn!("🔒 Connect from {} refused: {}", link.peer(), e);
            ConnectResponse {
                client_id: None,
                error: Some(e.to_info()),
            }
        }
    };
    link.deliver(response.into());
}
