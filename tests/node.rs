// tests/node.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use electrum_rpc::{
    //
    create_memory_transport,
    topics,
    ApiError,
    CorrelationId,
    MemoryPeer,
    Node,
    NodeBuilder,
    NodeConfig,
    RpcError,
    Transport,
    TransportBase,
    TransportConfig,
    TransportError,
    TransportHandle,
    TransportKind,
};

use common::{connected_node, fast_config, init_logging};

const WAIT: Duration = Duration::from_secs(2);

/// Answer the next `n` requests with `null`.
async fn answer_with_null(peer: &mut MemoryPeer, node: &Node, n: usize) {
    for _ in 0..n {
        let node = node.clone();
        let call = tokio::spawn(async move { node.request::<()>("server.ping", vec![]).await });
        let req = peer.recv_request().await.unwrap();
        peer.respond(req.id, Value::Null).await.unwrap();
        call.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_server_version_round_trip() {
    // ---
    // Arrange
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;
    answer_with_null(&mut peer, &node, 7).await;

    // ---
    // Act
    // ---
    let caller = node.clone();
    let call =
        tokio::spawn(async move { caller.request::<Vec<String>>("server.version", vec![]).await });

    let req = peer.recv_request().await.unwrap();
    assert_eq!(req.id, CorrelationId::from(7));
    assert_eq!(req.method, "server.version");
    assert!(req.params.is_empty());

    peer.push(r#"{"id":7,"result":["ElectrumX","1.4"]}"#)
        .await
        .unwrap();

    // ---
    // Assert
    // ---
    let version = call.await.unwrap().unwrap();
    assert_eq!(version, vec!["ElectrumX", "1.4"]);
    assert_eq!(node.pending_requests(), 0);
}

#[tokio::test]
async fn test_protocol_error_skips_decode() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;
    answer_with_null(&mut peer, &node, 3).await;

    let caller = node.clone();
    let call = tokio::spawn(async move {
        caller
            .request::<Vec<String>>("blockchain.transaction.get", vec![json!("00")])
            .await
    });

    let req = peer.recv_request().await.unwrap();
    assert_eq!(req.id, CorrelationId::from(3));
    peer.push(r#"{"id":3,"error":{"code":1,"message":"bad"}}"#)
        .await
        .unwrap();

    let err = call.await.unwrap().unwrap_err();
    match err {
        RpcError::Protocol(api) => assert_eq!(
            api,
            ApiError {
                code: 1,
                message: "bad".into()
            }
        ),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(node.pending_requests(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_get_their_own_response() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;

    let mut handles = Vec::new();
    for i in 0..20u64 {
        let c = node.clone();
        handles.push(tokio::spawn(async move {
            let echoed: u64 = c.request("test.echo", vec![json!(i)]).await.unwrap();
            (i, echoed)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..20 {
        requests.push(peer.recv_request().await.unwrap());
    }

    // Answer out of order.
    for req in requests.into_iter().rev() {
        peer.respond(req.id, req.params[0].clone()).await.unwrap();
    }

    for task in handles {
        let (sent, echoed) = task.await.unwrap();
        assert_eq!(sent, echoed);
    }
    assert_eq!(node.pending_requests(), 0);
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_request() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;

    let caller = node.clone();
    let call = tokio::spawn(async move { caller.request::<Value>("server.banner", vec![]).await });

    // Request is on the wire, so its waiter is registered.
    peer.recv_request().await.unwrap();

    node.shutdown().await;

    // Fails well before the 5s request timeout.
    let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Shutdown), "got {err:?}");

    assert!(node.is_closed());
    assert!(!node.is_connected());
    assert!(peer.recv_frame().await.is_none());

    let err = node.request::<Value>("server.banner", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Shutdown));

    // Idempotent.
    node.shutdown().await;
}

#[tokio::test]
async fn test_full_subscriber_buffer_drops_second_push() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;
    let mut sub = node.subscribe(topics::HEADERS);

    peer.push_json(&json!({"method": topics::HEADERS, "params": [{"height": 1}]}))
        .await
        .unwrap();
    peer.push_json(&json!({"method": topics::HEADERS, "params": [{"height": 2}]}))
        .await
        .unwrap();

    // Frames are routed in order, so once this answer arrives both pushes
    // have been handled.
    answer_with_null(&mut peer, &node, 1).await;

    let first = sub.try_recv().unwrap();
    let params: Vec<Value> = first.params().unwrap();
    assert_eq!(params[0]["height"], 1);
    assert_eq!(first.method(), topics::HEADERS);
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_larger_buffer_keeps_wire_order() {
    // ---
    init_logging();
    let node = NodeBuilder::new().subscriber_capacity(8).build();
    let (transport, handle, mut peer) = create_memory_transport(&node.config().transport_config());
    node.connect_with(transport, handle).await.unwrap();

    let mut sub = node.subscribe(topics::SCRIPTHASH);
    for n in 0..5 {
        peer.push_json(&json!({"method": topics::SCRIPTHASH, "params": ["aa", n]}))
            .await
            .unwrap();
    }
    answer_with_null(&mut peer, &node, 1).await;

    for n in 0..5 {
        let (_, status): (String, u64) = sub.try_recv().unwrap().params().unwrap();
        assert_eq!(status, n);
    }
}

#[tokio::test]
async fn test_repeated_subscriptions_each_receive() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;
    let mut a = node.subscribe(topics::HEADERS);
    let mut b = node.subscribe(topics::HEADERS);
    assert_eq!(node.subscriber_count(topics::HEADERS), 2);

    peer.push_json(&json!({"method": topics::HEADERS, "params": []}))
        .await
        .unwrap();

    assert!(timeout(WAIT, a.recv()).await.unwrap().is_some());
    assert!(timeout(WAIT, b.recv()).await.unwrap().is_some());
    assert_eq!(a.topic(), topics::HEADERS);
}

#[tokio::test]
async fn test_transport_failure_is_reported_once() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;
    let mut errors = node.errors();
    let mut sub = node.subscribe(topics::HEADERS);

    let caller = node.clone();
    let call = tokio::spawn(async move { caller.request::<Value>("server.banner", vec![]).await });
    peer.recv_request().await.unwrap();

    let failure = TransportError::Io {
        kind: std::io::ErrorKind::ConnectionReset,
        message: "reset by peer".into(),
    };
    peer.fail(failure.clone()).await.unwrap();
    assert_eq!(
        peer.fail(TransportError::Closed).await,
        Err(TransportError::Closed)
    );

    // Waiter fails fast with the transport's reason.
    let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    match err {
        RpcError::ConnectionLost(reported) => assert_eq!(reported, failure),
        other => panic!("expected connection lost, got {other:?}"),
    }

    timeout(WAIT, errors.changed()).await.unwrap().unwrap();
    assert_eq!(*errors.borrow_and_update(), Some(failure.clone()));
    assert_eq!(node.transport_error(), Some(failure));

    // Subscription streams end; nothing more is delivered.
    assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
    assert!(peer.push("{}").await.is_err());

    assert!(!node.is_connected());
    let err = node.request::<Value>("server.banner", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Shutdown));
}

#[tokio::test]
async fn test_second_connect_fails_and_first_survives() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;

    let (other, other_handle, mut other_peer) = create_memory_transport(&TransportConfig::default());
    let err = node.connect_with(other, other_handle).await.unwrap_err();
    assert!(matches!(err, RpcError::AlreadyConnected));

    // The rejected transport was closed.
    assert!(other_peer.recv_frame().await.is_none());

    assert!(node.is_connected());
    answer_with_null(&mut peer, &node, 1).await;
}

#[tokio::test]
async fn test_malformed_frame_is_discarded() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;

    let caller = node.clone();
    let call = tokio::spawn(async move { caller.request::<u32>("test.number", vec![]).await });
    let req = peer.recv_request().await.unwrap();

    peer.push("this is not json").await.unwrap();
    peer.push("[1,2,3]").await.unwrap();
    peer.respond(req.id, json!(42)).await.unwrap();

    assert_eq!(call.await.unwrap().unwrap(), 42);
    assert!(node.is_connected());
}

#[tokio::test]
async fn test_timeout_removes_pending_entry() {
    // ---
    let (node, mut peer) = connected_node(fast_config()).await;

    let err = node.request::<Value>("server.banner", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout));
    assert_eq!(node.pending_requests(), 0);

    // A late answer is ignored and the connection keeps working.
    let late = peer.recv_request().await.unwrap();
    peer.respond(late.id, json!("late")).await.unwrap();
    answer_with_null(&mut peer, &node, 1).await;
    assert!(node.is_connected());
}

#[tokio::test]
async fn test_frame_with_topic_and_id_takes_both_routes() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;
    let mut sub = node.subscribe(topics::HEADERS);

    let caller = node.clone();
    let call = tokio::spawn(async move {
        caller
            .request::<Value>(topics::HEADERS, vec![])
            .await
    });
    let req = peer.recv_request().await.unwrap();

    peer.push_json(&json!({
        "id": req.id,
        "method": topics::HEADERS,
        "result": {"height": 800000, "hex": "00"}
    }))
    .await
    .unwrap();

    let tip = call.await.unwrap().unwrap();
    assert_eq!(tip["height"], 800000);

    let pushed = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(pushed.id(), Some(req.id));
    let result: Value = pushed.result().unwrap();
    assert_eq!(result["height"], 800000);
}

#[tokio::test]
async fn test_unknown_id_is_ignored() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;

    peer.push(r#"{"id":999,"result":true}"#).await.unwrap();
    answer_with_null(&mut peer, &node, 1).await;
    assert_eq!(node.pending_requests(), 0);
}

#[tokio::test]
async fn test_request_before_connect() {
    // ---
    init_logging();
    let node = Node::new();

    let err = node.request::<Value>("server.ping", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::NotConnected));
    assert!(!node.is_closed());
}

#[tokio::test]
async fn test_connect_after_shutdown() {
    // ---
    init_logging();
    let node = Node::new();
    node.shutdown().await;

    let (transport, handle, mut peer) = create_memory_transport(&TransportConfig::default());
    let err = node.connect_with(transport, handle).await.unwrap_err();
    assert!(matches!(err, RpcError::Shutdown));
    assert!(peer.recv_frame().await.is_none());

    // Subscriptions on a closed node end immediately.
    let mut sub = node.subscribe(topics::HEADERS);
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn test_dial_failure_leaves_node_connectable() {
    // ---
    init_logging();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let node = Node::new();
    let err = node.connect_tcp(&addr).await.unwrap_err();
    assert!(matches!(err, RpcError::Io(_)), "got {err:?}");
    assert!(!node.is_connected());

    let (transport, handle, mut peer) = create_memory_transport(&TransportConfig::default());
    node.connect_with(transport, handle).await.unwrap();
    answer_with_null(&mut peer, &node, 1).await;
}

#[tokio::test]
async fn test_keep_alive_sends_ping() {
    // ---
    init_logging();
    let node = NodeBuilder::new()
        .keep_alive(Duration::from_millis(50))
        .build();
    let (transport, handle, mut peer) = create_memory_transport(&node.config().transport_config());
    node.connect_with(transport, handle).await.unwrap();

    for _ in 0..2 {
        let ping = timeout(WAIT, peer.recv_request()).await.unwrap().unwrap();
        assert_eq!(ping.method, "server.ping");
        assert!(ping.params.is_empty());
        peer.respond(ping.id, Value::Null).await.unwrap();
    }

    node.shutdown().await;
}

#[tokio::test]
async fn test_call_returns_raw_response() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;

    let caller = node.clone();
    let call = tokio::spawn(async move { caller.call("server.features", vec![]).await });
    let req = peer.recv_request().await.unwrap();
    peer.push_json(&json!({"jsonrpc": "2.0", "id": req.id, "result": {"pruning": null}}))
        .await
        .unwrap();

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.id(), Some(req.id));

    let doc: Value = response.decode().unwrap();
    assert_eq!(doc["jsonrpc"], "2.0");
    let features: Value = response.result().unwrap();
    assert!(features["pruning"].is_null());
}

/// Transport whose writes never finish on their own; `close()` fails them.
struct StallingTransport {
    base: TransportBase,
    closed: watch::Sender<bool>,
}

#[async_trait::async_trait]
impl Transport for StallingTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send(&self, _frame: Bytes) -> electrum_rpc::Result<()> {
        // ---
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
        Err(RpcError::Transport(TransportError::Closed))
    }

    async fn close(&self) -> electrum_rpc::Result<()> {
        // ---
        self.closed.send_replace(true);
        Ok(())
    }
}

#[tokio::test]
async fn test_shutdown_during_send_reports_shutdown() {
    // ---
    // Arrange
    // ---
    init_logging();
    let node = Node::new();

    let transport = Arc::new(StallingTransport {
        base: TransportBase::new("stalling", TransportKind::Memory),
        closed: watch::channel(false).0,
    });
    let (_frames, inbound) = mpsc::channel::<Bytes>(1);
    let (_errors, errors) = mpsc::channel::<TransportError>(1);
    node.connect_with(transport, TransportHandle { inbound, errors })
        .await
        .unwrap();

    let caller = node.clone();
    let call = tokio::spawn(async move { caller.request::<Value>("server.banner", vec![]).await });

    while node.pending_requests() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // ---
    // Act
    // ---
    node.shutdown().await;

    // ---
    // Assert
    // ---
    let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Shutdown), "got {err:?}");
    assert_eq!(node.pending_requests(), 0);
}

#[tokio::test]
async fn test_abandoned_request_releases_its_entry() {
    // ---
    let (node, mut peer) = connected_node(NodeConfig::default()).await;

    // Caller gives up long before the node's own timeout.
    let abandoned = timeout(
        Duration::from_millis(50),
        node.request::<Value>("server.banner", vec![]),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(node.pending_requests(), 0);

    // Its late answer is ignored and the connection keeps working.
    let late = peer.recv_request().await.unwrap();
    peer.respond(late.id, json!("late")).await.unwrap();
    answer_with_null(&mut peer, &node, 1).await;
    assert!(node.is_connected());
}
