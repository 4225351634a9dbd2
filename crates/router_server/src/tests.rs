use crate::*;
use router_core::protocol::*;
use router_core::{DuplexChannel, ErrorInfo, ErrorKind, InProcessChannel, WebSocketChannel, WebSocketConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

fn test_server() -> MessageRouterServer {
    create_server_with_config(ServerConfig {
        bind_address: "127.0.0.1:0".parse().expect("valid address"),
        ..Default::default()
    })
}

async fn next(channel: &Arc<dyn DuplexChannel>) -> Message {
    tokio::time::timeout(WAIT, channel.receive())
        .await
        .expect("Timed out waiting for a message")
        .expect("Channel failed")
}

async fn assert_silent(channel: &Arc<dyn DuplexChannel>) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), channel.receive()).await;
    assert!(outcome.is_err(), "Expected no message, got {:?}", outcome);
}

async fn send(channel: &Arc<dyn DuplexChannel>, message: impl Into<Message>) {
    channel.send(message.into()).await.expect("Failed to send");
}

async fn connect_with(
    channel: &Arc<dyn DuplexChannel>,
    request: ConnectRequest,
) -> ConnectResponse {
    send(channel, request).await;
    match next(channel).await {
        Message::ConnectResponse(response) => response,
        other => panic!("Expected ConnectResponse, got {:?}", other),
    }
}

async fn open(server: &MessageRouterServer) -> (Arc<dyn DuplexChannel>, String) {
    let channel = server.connect_in_process();
    let response = connect_with(&channel, ConnectRequest::default()).await;
    let client_id = response.client_id.expect("Connect should assign a client id");
    (channel, client_id)
}

async fn wait_until_gone(server: &MessageRouterServer, client_id: &str) {
    for _ in 0..100 {
        if !server.broker().is_connected(client_id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Client {client_id} was never disconnected");
}

async fn register(
    channel: &Arc<dyn DuplexChannel>,
    request_id: &str,
    endpoint: &str,
) -> Option<ErrorInfo> {
    send(
        channel,
        RegisterServiceRequest {
            request_id: request_id.into(),
            endpoint: endpoint.into(),
        },
    )
    .await;
    match next(channel).await {
        Message::RegisterServiceResponse(response) => {
            assert_eq!(response.request_id, request_id);
            response.error
        }
        other => panic!("Expected RegisterServiceResponse, got {:?}", other),
    }
}

fn invoke(request_id: &str, endpoint: &str, payload: &str) -> InvokeRequest {
    InvokeRequest {
        request_id: request_id.into(),
        endpoint: endpoint.into(),
        payload: Some(payload.into()),
        scope: None,
        source_id: None,
        correlation_id: None,
    }
}

#[tokio::test]
async fn test_connect_assigns_distinct_ids() {
    let server = test_server();
    let (_a, a_id) = open(&server).await;
    let (_b, b_id) = open(&server).await;

    assert_ne!(a_id, b_id);
    assert_eq!(server.broker().client_count().await, 2);
}

#[tokio::test]
async fn test_reconnect_with_issued_id_keeps_identity() {
    let server = test_server();
    let (first, client_id) = open(&server).await;
    first.close().await;
    wait_until_gone(&server, &client_id).await;

    let second = server.connect_in_process();
    let response = connect_with(
        &second,
        ConnectRequest {
            client_id: Some(client_id.clone()),
            access_token: None,
        },
    )
    .await;
    assert_eq!(response.client_id.as_deref(), Some(client_id.as_str()));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_unknown_prior_id_is_replaced() {
    let server = test_server();

    let forged = server.connect_in_process();
    let response = connect_with(
        &forged,
        ConnectRequest {
            client_id: Some("made-up".into()),
            access_token: None,
        },
    )
    .await;
    let assigned = response.client_id.expect("id");
    assert_ne!(assigned, "made-up");
    assert!(!server.broker().is_connected("made-up").await);
}

#[tokio::test]
async fn test_live_issued_id_is_taken_over() {
    let server = test_server();
    let (stale, client_id) = open(&server).await;
    send(&stale, SubscribeMessage { topic: "old".into() }).await;
    assert_eq!(register(&stale, "r", "svc").await, None);

    let fresh = server.connect_in_process();
    let response = connect_with(
        &fresh,
        ConnectRequest {
            client_id: Some(client_id.clone()),
            access_token: None,
        },
    )
    .await;
    assert_eq!(response.client_id.as_deref(), Some(client_id.as_str()));
    assert!(response.error.is_none());

    let closed = tokio::time::timeout(WAIT, stale.receive())
        .await
        .expect("The replaced connection should be closed");
    assert!(closed.is_err());

    // The old connection's teardown must not remove the new session.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.broker().is_connected(&client_id).await);
    assert_eq!(server.broker().client_count().await, 1);
    assert_eq!(server.broker().subscriber_count("old").await, 0);
    assert_eq!(server.broker().endpoint_owner("svc").await, None);

    assert_eq!(register(&fresh, "r", "svc").await, None);
    assert_eq!(server.broker().endpoint_owner("svc").await, Some(client_id));
}

#[tokio::test]
async fn test_close_then_immediate_reconnect_keeps_identity() {
    let server = test_server();
    let (mut channel, client_id) = open(&server).await;

    for _ in 0..50 {
        channel.close().await;
        channel = server.connect_in_process();
        let response = connect_with(
            &channel,
            ConnectRequest {
                client_id: Some(client_id.clone()),
                access_token: None,
            },
        )
        .await;
        assert_eq!(response.client_id.as_deref(), Some(client_id.as_str()));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.broker().is_connected(&client_id).await);
    assert_eq!(server.broker().client_count().await, 1);
}

#[tokio::test]
async fn test_only_recent_departed_ids_are_reclaimable() {
    let config = ServerConfig::default();
    let broker = Arc::new(Broker::new(&config).with_retired_id_capacity(1));
    let server = MessageRouterServer::with_broker(config, broker);

    let (first, first_id) = open(&server).await;
    let (second, second_id) = open(&server).await;
    first.close().await;
    wait_until_gone(&server, &first_id).await;
    second.close().await;
    wait_until_gone(&server, &second_id).await;

    let reclaim = |client_id: &String| ConnectRequest {
        client_id: Some(client_id.clone()),
        access_token: None,
    };
    let channel = server.connect_in_process();
    let response = connect_with(&channel, reclaim(&second_id)).await;
    assert_eq!(response.client_id.as_deref(), Some(second_id.as_str()));

    let channel = server.connect_in_process();
    let response = connect_with(&channel, reclaim(&first_id)).await;
    let assigned = response.client_id.expect("id");
    assert_ne!(assigned, first_id);
}

#[tokio::test]
async fn test_repeat_connect_answers_current_id() {
    let server = test_server();
    let (channel, client_id) = open(&server).await;

    let response = connect_with(&channel, ConnectRequest::default()).await;
    assert_eq!(response.client_id, Some(client_id));
    assert_eq!(server.broker().client_count().await, 1);
}

#[tokio::test]
async fn test_messages_before_connect_are_dropped() {
    let server = test_server();
    let channel = server.connect_in_process();

    send(&channel, SubscribeMessage { topic: "early".into() }).await;
    send(
        &channel,
        RegisterServiceRequest {
            request_id: "1".into(),
            endpoint: "svc".into(),
        },
    )
    .await;
    assert_silent(&channel).await;

    let response = connect_with(&channel, ConnectRequest::default()).await;
    assert!(response.client_id.is_some());
    assert_eq!(server.broker().subscriber_count("early").await, 0);
    assert_eq!(server.broker().endpoint_owner("svc").await, None);
}

#[tokio::test]
async fn test_publish_reaches_only_subscribers() {
    let server = test_server();
    let (publisher, publisher_id) = open(&server).await;
    let (first, _) = open(&server).await;
    let (second, _) = open(&server).await;
    let (bystander, _) = open(&server).await;

    send(&first, SubscribeMessage { topic: "prices".into() }).await;
    send(&second, SubscribeMessage { topic: "prices".into() }).await;
    send(&second, SubscribeMessage { topic: "prices".into() }).await;
    send(&bystander, SubscribeMessage { topic: "news".into() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.broker().subscriber_count("prices").await, 2);

    send(
        &publisher,
        PublishMessage {
            topic: "prices".into(),
            payload: Some("42".into()),
            scope: None,
            correlation_id: Some("c-1".into()),
        },
    )
    .await;

    let expected: Message = TopicMessage {
        topic: "prices".into(),
        payload: Some("42".into()),
        scope: None,
        source_id: publisher_id,
        correlation_id: Some("c-1".into()),
    }
    .into();
    assert_eq!(next(&first).await, expected);
    assert_eq!(next(&second).await, expected);
    assert_silent(&second).await;
    assert_silent(&bystander).await;
    assert_silent(&publisher).await;
}

#[tokio::test]
async fn test_publish_preserves_order_per_publisher() {
    let server = test_server();
    let (publisher, _) = open(&server).await;
    let (subscriber, _) = open(&server).await;
    send(&subscriber, SubscribeMessage { topic: "seq".into() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    for n in 0..20 {
        send(
            &publisher,
            PublishMessage {
                topic: "seq".into(),
                payload: Some(n.to_string().into()),
                scope: None,
                correlation_id: None,
            },
        )
        .await;
    }

    for n in 0..20 {
        match next(&subscriber).await {
            Message::Topic(update) => assert_eq!(update.payload, Some(n.to_string().into())),
            other => panic!("Expected Topic, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let server = test_server();
    let (channel, _) = open(&server).await;

    send(&channel, SubscribeMessage { topic: "t".into() }).await;
    send(&channel, UnsubscribeMessage { topic: "t".into() }).await;
    send(&channel, UnsubscribeMessage { topic: "never-subscribed".into() }).await;
    send(
        &channel,
        PublishMessage {
            topic: "t".into(),
            payload: None,
            scope: None,
            correlation_id: None,
        },
    )
    .await;

    assert_silent(&channel).await;
    assert_eq!(server.broker().subscriber_count("t").await, 0);
}

#[tokio::test]
async fn test_duplicate_registration_keeps_first_owner() {
    let server = test_server();
    let (owner, owner_id) = open(&server).await;
    let (other, _) = open(&server).await;

    assert_eq!(register(&owner, "1", "svc").await, None);

    let again = register(&owner, "2", "svc").await.expect("error");
    assert_eq!(again.kind(), Some(ErrorKind::DuplicateEndpoint));

    let taken = register(&other, "1", "svc").await.expect("error");
    assert_eq!(taken.kind(), Some(ErrorKind::DuplicateEndpoint));

    assert_eq!(server.broker().endpoint_owner("svc").await, Some(owner_id));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_registration_has_one_winner() {
    let server = test_server();
    let mut clients = Vec::new();
    for _ in 0..8 {
        clients.push(open(&server).await.0);
    }

    let attempts = clients.iter().cloned().enumerate().map(|(i, channel)| {
        tokio::spawn(async move { register(&channel, &i.to_string(), "contested").await })
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results
        .into_iter()
        .map(|joined| joined.expect("Registration task panicked"))
        .filter(Option::is_none)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_invalid_names_are_rejected() {
    let server = test_server();
    let (channel, _) = open(&server).await;

    let error = register(&channel, "1", "  ").await.expect("error");
    assert_eq!(error.kind(), Some(ErrorKind::InvalidEndpoint));

    send(&channel, SubscribeMessage { topic: "".into() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.broker().subscriber_count("").await, 0);
}

#[tokio::test]
async fn test_unregister_only_by_owner() {
    let server = test_server();
    let (owner, owner_id) = open(&server).await;
    let (other, _) = open(&server).await;
    assert_eq!(register(&owner, "1", "svc").await, None);

    send(
        &other,
        UnregisterServiceRequest {
            request_id: "9".into(),
            endpoint: "svc".into(),
        },
    )
    .await;
    match next(&other).await {
        Message::UnregisterServiceResponse(response) => {
            assert_eq!(response.request_id, "9");
            assert!(response.error.is_none());
        }
        other => panic!("Expected UnregisterServiceResponse, got {:?}", other),
    }
    assert_eq!(server.broker().endpoint_owner("svc").await, Some(owner_id));

    send(
        &owner,
        UnregisterServiceRequest {
            request_id: "2".into(),
            endpoint: "svc".into(),
        },
    )
    .await;
    assert!(matches!(next(&owner).await, Message::UnregisterServiceResponse(_)));
    assert_eq!(server.broker().endpoint_owner("svc").await, None);
}

#[tokio::test]
async fn test_invoke_round_trip_restores_caller_request_id() {
    let server = test_server();
    let (service, _) = open(&server).await;
    let (caller, caller_id) = open(&server).await;
    assert_eq!(register(&service, "r", "testService").await, None);

    send(&caller, invoke("7", "testService", "xyz")).await;

    let forwarded = match next(&service).await {
        Message::Invoke(request) => request,
        other => panic!("Expected Invoke, got {:?}", other),
    };
    assert_eq!(forwarded.endpoint, "testService");
    assert_eq!(forwarded.payload, Some("xyz".into()));
    assert_eq!(forwarded.source_id, Some(caller_id));
    assert_ne!(forwarded.request_id, "7");
    assert_eq!(server.broker().pending_invocations().await, 1);

    send(
        &service,
        InvokeResponse {
            request_id: forwarded.request_id,
            payload: Some("abc".into()),
            error: None,
        },
    )
    .await;

    let expected: Message = InvokeResponse {
        request_id: "7".into(),
        payload: Some("abc".into()),
        error: None,
    }
    .into();
    assert_eq!(next(&caller).await, expected);
    assert_eq!(server.broker().pending_invocations().await, 0);
}

#[tokio::test]
async fn test_callers_may_share_request_ids() {
    let server = test_server();
    let (service, _) = open(&server).await;
    let (a, _) = open(&server).await;
    let (b, _) = open(&server).await;
    assert_eq!(register(&service, "r", "echo").await, None);

    send(&a, invoke("1", "echo", "from a")).await;
    send(&b, invoke("1", "echo", "from b")).await;

    for _ in 0..2 {
        let Message::Invoke(request) = next(&service).await else {
            panic!("Expected Invoke");
        };
        send(
            &service,
            InvokeResponse {
                request_id: request.request_id,
                payload: request.payload,
                error: None,
            },
        )
        .await;
    }

    let Message::InvokeResponse(for_a) = next(&a).await else {
        panic!("Expected InvokeResponse");
    };
    let Message::InvokeResponse(for_b) = next(&b).await else {
        panic!("Expected InvokeResponse");
    };
    assert_eq!(for_a.payload, Some("from a".into()));
    assert_eq!(for_b.payload, Some("from b".into()));
}

#[tokio::test]
async fn test_invoke_unknown_endpoint() {
    let server = test_server();
    let (caller, _) = open(&server).await;
    let (bystander, _) = open(&server).await;

    send(&caller, invoke("1", "doesNotExist", "payload")).await;

    match next(&caller).await {
        Message::InvokeResponse(response) => {
            assert_eq!(response.request_id, "1");
            assert_eq!(
                response.error.and_then(|e| e.kind()),
                Some(ErrorKind::UnknownEndpoint)
            );
        }
        other => panic!("Expected InvokeResponse, got {:?}", other),
    }
    assert_silent(&bystander).await;
}

#[tokio::test]
async fn test_duplicate_pending_request_id() {
    let server = test_server();
    let (service, _) = open(&server).await;
    let (caller, _) = open(&server).await;
    assert_eq!(register(&service, "r", "slow").await, None);

    send(&caller, invoke("1", "slow", "a")).await;
    send(&caller, invoke("1", "slow", "b")).await;

    match next(&caller).await {
        Message::InvokeResponse(response) => {
            assert_eq!(response.request_id, "1");
            assert_eq!(
                response.error.and_then(|e| e.kind()),
                Some(ErrorKind::DuplicateRequestId)
            );
        }
        other => panic!("Expected InvokeResponse, got {:?}", other),
    }
    assert!(matches!(next(&service).await, Message::Invoke(_)));
    assert_silent(&service).await;
}

#[tokio::test]
async fn test_response_from_wrong_client_is_discarded() {
    let server = test_server();
    let (service, _) = open(&server).await;
    let (caller, _) = open(&server).await;
    let (forger, _) = open(&server).await;
    assert_eq!(register(&service, "r", "svc").await, None);

    send(&caller, invoke("1", "svc", "x")).await;
    let Message::Invoke(request) = next(&service).await else {
        panic!("Expected Invoke");
    };

    send(
        &forger,
        InvokeResponse {
            request_id: request.request_id.clone(),
            payload: Some("forged".into()),
            error: None,
        },
    )
    .await;
    send(
        &forger,
        InvokeResponse {
            request_id: "no-such-invocation".into(),
            payload: None,
            error: None,
        },
    )
    .await;
    assert_silent(&caller).await;
    assert_eq!(server.broker().pending_invocations().await, 1);
}

#[tokio::test]
async fn test_callee_disconnect_fails_pending_invocations() {
    let server = test_server();
    let (service, service_id) = open(&server).await;
    let (caller, _) = open(&server).await;
    assert_eq!(register(&service, "r", "svc").await, None);

    send(&caller, invoke("1", "svc", "x")).await;
    assert!(matches!(next(&service).await, Message::Invoke(_)));

    service.close().await;
    wait_until_gone(&server, &service_id).await;

    match next(&caller).await {
        Message::InvokeResponse(response) => {
            assert_eq!(response.request_id, "1");
            assert_eq!(
                response.error.and_then(|e| e.kind()),
                Some(ErrorKind::ConnectionClosed)
            );
        }
        other => panic!("Expected InvokeResponse, got {:?}", other),
    }
    assert_eq!(server.broker().endpoint_owner("svc").await, None);
    assert_eq!(server.broker().pending_invocations().await, 0);
}

#[tokio::test]
async fn test_caller_disconnect_drops_pending_invocation() {
    let server = test_server();
    let (service, service_id) = open(&server).await;
    let (caller, caller_id) = open(&server).await;
    assert_eq!(register(&service, "r", "svc").await, None);

    send(&caller, invoke("1", "svc", "x")).await;
    let Message::Invoke(request) = next(&service).await else {
        panic!("Expected Invoke");
    };
    assert_eq!(server.broker().pending_invocations().await, 1);

    caller.close().await;
    wait_until_gone(&server, &caller_id).await;
    assert_eq!(server.broker().pending_invocations().await, 0);

    send(
        &service,
        InvokeResponse {
            request_id: request.request_id,
            payload: Some("too late".into()),
            error: None,
        },
    )
    .await;
    assert_silent(&service).await;
    assert_eq!(server.broker().endpoint_owner("svc").await, Some(service_id));
}

#[tokio::test]
async fn test_client_scoped_invoke_reaches_unregistered_endpoint() {
    let server = test_server();
    let (target, target_id) = open(&server).await;
    let (owner, _) = open(&server).await;
    let (caller, caller_id) = open(&server).await;
    assert_eq!(register(&owner, "r", "status").await, None);

    let mut request = invoke("1", "status", "x");
    request.scope = Some(MessageScope::from_client_id(&target_id));
    send(&caller, request).await;

    let Message::Invoke(forwarded) = next(&target).await else {
        panic!("Expected Invoke");
    };
    assert_eq!(forwarded.endpoint, "status");
    assert_eq!(forwarded.source_id, Some(caller_id));
    assert_eq!(forwarded.scope, None);
    assert_silent(&owner).await;

    send(
        &target,
        InvokeResponse {
            request_id: forwarded.request_id,
            payload: Some("ok".into()),
            error: None,
        },
    )
    .await;
    let Message::InvokeResponse(response) = next(&caller).await else {
        panic!("Expected InvokeResponse");
    };
    assert_eq!(response.request_id, "1");
    assert_eq!(response.payload, Some("ok".into()));
}

#[tokio::test]
async fn test_invoke_scoped_to_unknown_client() {
    let server = test_server();
    let (owner, _) = open(&server).await;
    let (caller, _) = open(&server).await;
    assert_eq!(register(&owner, "r", "status").await, None);

    let mut request = invoke("1", "status", "x");
    request.scope = Some(MessageScope::from_client_id("nobody"));
    send(&caller, request).await;

    match next(&caller).await {
        Message::InvokeResponse(response) => {
            assert_eq!(response.request_id, "1");
            assert_eq!(
                response.error.and_then(|e| e.kind()),
                Some(ErrorKind::UnknownClient)
            );
        }
        other => panic!("Expected InvokeResponse, got {:?}", other),
    }
    assert_silent(&owner).await;
    assert_eq!(server.broker().pending_invocations().await, 0);
}

#[tokio::test]
async fn test_publish_scope_is_forwarded() {
    let server = test_server();
    let (subscriber, _) = open(&server).await;
    let (publisher, _) = open(&server).await;
    send(&subscriber, SubscribeMessage { topic: "t".into() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send(
        &publisher,
        PublishMessage {
            topic: "t".into(),
            payload: Some("hi".into()),
            scope: MessageScope::parse("desktop"),
            correlation_id: None,
        },
    )
    .await;
    let Message::Topic(update) = next(&subscriber).await else {
        panic!("Expected Topic");
    };
    assert_eq!(update.scope.as_ref().map(MessageScope::as_str), Some("desktop"));
}

#[tokio::test]
async fn test_disconnect_releases_subscriptions_and_endpoints() {
    let server = test_server();
    let (leaver, leaver_id) = open(&server).await;
    let (publisher, _) = open(&server).await;

    send(&leaver, SubscribeMessage { topic: "t".into() }).await;
    assert_eq!(register(&leaver, "1", "svc").await, None);
    assert_eq!(server.broker().subscriber_count("t").await, 1);

    leaver.close().await;
    wait_until_gone(&server, &leaver_id).await;

    assert_eq!(server.broker().subscriber_count("t").await, 0);
    assert_eq!(server.broker().endpoint_owner("svc").await, None);

    send(
        &publisher,
        PublishMessage {
            topic: "t".into(),
            payload: Some("ignored".into()),
            scope: None,
            correlation_id: None,
        },
    )
    .await;
    assert_eq!(register(&publisher, "1", "svc").await, None);
}

#[tokio::test]
async fn test_invalid_access_token_is_refused() {
    let server = create_server_with_config(ServerConfig {
        access_token: Some("secret".into()),
        ..Default::default()
    });

    let channel = server.connect_in_process();
    let response = connect_with(
        &channel,
        ConnectRequest {
            client_id: None,
            access_token: Some("wrong".into()),
        },
    )
    .await;
    assert!(response.client_id.is_none());
    assert_eq!(
        response.error.and_then(|e| e.kind()),
        Some(ErrorKind::InvalidAccessToken)
    );

    let response = connect_with(
        &channel,
        ConnectRequest {
            client_id: None,
            access_token: Some("secret".into()),
        },
    )
    .await;
    assert!(response.client_id.is_some());
}

#[tokio::test]
async fn test_connection_limit() {
    let server = create_server_with_config(ServerConfig {
        max_connections: 1,
        ..Default::default()
    });
    let (_first, _) = open(&server).await;

    let second = server.connect_in_process();
    let response = connect_with(&second, ConnectRequest::default()).await;
    assert_eq!(
        response.error.and_then(|e| e.kind()),
        Some(ErrorKind::ConnectionFailed)
    );
}

#[tokio::test]
async fn test_full_outbound_queue_evicts_client() {
    let (server_end, client_end) = InProcessChannel::pair(4);
    let server_end: Arc<dyn DuplexChannel> = Arc::new(server_end);
    let (outbound, _pump) = mpsc::channel(1);
    let link = ClientLink::new(outbound, server_end.clone());

    let update = || -> Message {
        TopicMessage {
            topic: "t".into(),
            payload: None,
            scope: None,
            source_id: "x".into(),
            correlation_id: None,
        }
        .into()
    };
    assert_eq!(link.deliver(update()), Delivery::Queued);
    assert_eq!(link.deliver(update()), Delivery::Evicted);

    let closed = tokio::time::timeout(WAIT, client_end.receive())
        .await
        .expect("Eviction should close the channel");
    assert!(closed.is_err());
    assert!(server_end.is_closed());
}

#[tokio::test]
async fn test_websocket_end_to_end() {
    let server = test_server();
    let listener = server.listen().await.expect("Failed to bind");
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    let url = server.url().expect("url after listen");
    assert!(url.starts_with("ws://127.0.0.1:"));
    assert!(url.ends_with("/ws"));

    let channel: Arc<dyn DuplexChannel> = Arc::new(
        WebSocketChannel::connect(&url, WebSocketConfig::default())
            .await
            .expect("Failed to connect"),
    );
    let response = connect_with(&channel, ConnectRequest::default()).await;
    let client_id = response.client_id.expect("id");

    send(&channel, SubscribeMessage { topic: "echo".into() }).await;
    send(
        &channel,
        PublishMessage {
            topic: "echo".into(),
            payload: Some(MessageBuffer::create_base64([1u8, 2, 3])),
            scope: None,
            correlation_id: None,
        },
    )
    .await;
    match next(&channel).await {
        Message::Topic(update) => {
            assert_eq!(update.source_id, client_id);
            let payload = update.payload.expect("payload");
            assert_eq!(payload.get_base64_bytes().expect("base64"), vec![1, 2, 3]);
        }
        other => panic!("Expected Topic, got {:?}", other),
    }

    server.shutdown();
    tokio::time::timeout(WAIT, serving)
        .await
        .expect("Accept loop should stop")
        .expect("Serve task panicked")
        .expect("Serve failed");
    let closed = tokio::time::timeout(WAIT, channel.receive())
        .await
        .expect("Shutdown should close clients");
    assert!(closed.is_err());
}

#[tokio::test]
async fn test_launch_environment() {
    let server = create_server_with_config(ServerConfig {
        bind_address: "127.0.0.1:0".parse().expect("valid address"),
        access_token: Some("token".into()),
        ..Default::default()
    });
    assert!(server.launch_environment().iter().all(|(key, _)| key != router_core::URL_ENV_VAR));

    let _listener = server.listen().await.expect("Failed to bind");
    let environment = server.launch_environment();
    assert_eq!(environment.len(), 2);
    assert_eq!(environment[0].0, router_core::URL_ENV_VAR);
    assert_eq!(Some(environment[0].1.clone()), server.url());
    assert_eq!(
        environment[1],
        (router_core::ACCESS_TOKEN_ENV_VAR.to_string(), "token".to_string())
    );
}
