use std::sync::Arc;
use std::time::Duration;

use molecular_mesh::{ActionDef, ActionOutcome, Broker, Context, EventDef, LocalBus, LocalTransport, ServiceSchema};
use serde_json::json;

fn broker(bus: &LocalBus, node_id: &str) -> Broker {
    Broker::builder()
        .node_id(node_id)
        .transport(Arc::new(LocalTransport::new(bus.clone())))
        .heartbeat_interval(Duration::from_millis(50))
        .request_timeout(Duration::from_secs(2))
        .build()
}

async fn math_service() -> ServiceSchema {
    ServiceSchema::new("math").action(ActionDef::new("add", |ctx: Context| async move {
        let a = ctx.params["a"].as_f64().unwrap_or(0.0);
        let b = ctx.params["b"].as_f64().unwrap_or(0.0);
        Ok(ActionOutcome::new(json!(a + b), ctx.meta))
    }))
}

#[tokio::test]
async fn local_call_resolves_without_transport_round_trip() {
    let bus = LocalBus::new();
    let node = broker(&bus, "node-a");
    node.register(math_service().await).await.unwrap();
    node.start().await.unwrap();

    let result = node.call("math.add", json!({"a": 2, "b": 3})).await.unwrap();
    assert_eq!(result, json!(5.0));

    node.stop().await.unwrap();
}

#[tokio::test]
async fn remote_call_succeeds_across_two_nodes() {
    let bus = LocalBus::new();
    let server = broker(&bus, "server-node");
    server.register(math_service().await).await.unwrap();
    server.start().await.unwrap();

    let client = broker(&bus, "client-node");
    client.start().await.unwrap();
    client.wait_for_services(&["math"], Duration::from_secs(2)).await.unwrap();

    let result = client.call("math.add", json!({"a": 10, "b": 32})).await.unwrap();
    assert_eq!(result, json!(42.0));

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn remote_call_error_propagates_as_remote_call_error() {
    let bus = LocalBus::new();
    let server = broker(&bus, "server-node");
    server
        .register(ServiceSchema::new("risky").action(ActionDef::new("fail", |_ctx: Context| async move {
            Err(molecular_mesh::BrokerError::HandlerError {
                action: "risky.fail".into(),
                message: "boom".into(),
                stack: None,
            })
        })))
        .await
        .unwrap();
    server.start().await.unwrap();

    let client = broker(&bus, "client-node");
    client.start().await.unwrap();
    client.wait_for_services(&["risky"], Duration::from_secs(2)).await.unwrap();

    let err = client.call("risky.fail", json!({})).await.unwrap_err();
    match err {
        molecular_mesh::BrokerError::RemoteCallError { message, node_id, .. } => {
            assert_eq!(message, "boom");
            assert_eq!(node_id, "server-node");
        }
        other => panic!("expected RemoteCallError, got {other:?}"),
    }

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn call_to_unknown_action_is_service_not_available() {
    let bus = LocalBus::new();
    let node = broker(&bus, "solo-node");
    node.start().await.unwrap();

    let err = node.call("nope.nothing", json!({})).await.unwrap_err();
    assert!(matches!(err, molecular_mesh::BrokerError::ServiceNotAvailable(_)));

    node.stop().await.unwrap();
}

#[tokio::test]
async fn call_to_unregistered_action_is_service_not_available() {
    let bus = LocalBus::new();
    let lonely = broker(&bus, "lonely-node");
    lonely.start().await.unwrap();

    let err = lonely.call("math.add", json!({"a": 1, "b": 1})).await.unwrap_err();
    assert!(matches!(err, molecular_mesh::BrokerError::ServiceNotAvailable(_)));

    lonely.stop().await.unwrap();
}

#[tokio::test]
async fn remote_call_times_out_when_handler_is_slower_than_the_deadline() {
    let bus = LocalBus::new();
    let server = broker(&bus, "slow-server");
    server
        .register(ServiceSchema::new("slow").action(ActionDef::new("reply", |ctx: Context| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(ActionOutcome::new(json!("too late"), ctx.meta))
        })))
        .await
        .unwrap();
    server.start().await.unwrap();

    let client = Broker::builder()
        .node_id("impatient-client")
        .transport(Arc::new(LocalTransport::new(bus)))
        .request_timeout(Duration::from_millis(50))
        .build();
    client.start().await.unwrap();
    client.wait_for_services(&["slow"], Duration::from_secs(2)).await.unwrap();

    let err = client.call("slow.reply", json!({})).await.unwrap_err();
    assert!(matches!(err, molecular_mesh::BrokerError::RequestTimeout { .. }));

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn peer_disconnect_cancels_pending_request_with_node_disconnected() {
    let bus = LocalBus::new();
    let server = broker(&bus, "flaky-node");
    server
        .register(ServiceSchema::new("slow").action(ActionDef::new("wait", |ctx: Context| async move {
            // Never responds: the handler parks forever so the server can
            // be killed mid-flight without ever publishing a RESPONSE.
            std::future::pending::<()>().await;
            Ok(ActionOutcome::new(json!(null), ctx.meta))
        })))
        .await
        .unwrap();
    server.start().await.unwrap();

    let client = Arc::new(broker(&bus, "waiting-client"));
    client.start().await.unwrap();
    client.wait_for_services(&["slow"], Duration::from_secs(2)).await.unwrap();

    let client_for_call = client.clone();
    let call = tokio::spawn(async move { client_for_call.call("slow.wait", json!({})).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.stop().await.unwrap();

    // stop() publishes DISCONNECT, which should cancel the still-pending request.
    let result = tokio::time::timeout(Duration::from_secs(2), call).await;
    assert!(result.is_ok(), "call task should resolve once DISCONNECT arrives");

    client.stop().await.unwrap();
}

#[tokio::test]
async fn meta_is_echoed_unchanged_across_a_remote_call() {
    let bus = LocalBus::new();
    let server = broker(&bus, "meta-server");
    server
        .register(ServiceSchema::new("echo").action(ActionDef::new("ping", |ctx: Context| async move {
            Ok(ActionOutcome::new(ctx.meta.clone(), ctx.meta))
        })))
        .await
        .unwrap();
    server.start().await.unwrap();

    let client = broker(&bus, "meta-client");
    client.start().await.unwrap();
    client.wait_for_services(&["echo"], Duration::from_secs(2)).await.unwrap();

    let meta = json!({"traceId": "abc-123"});
    let result = client.call_opts("echo.ping", json!({}), meta.clone(), None).await.unwrap();
    assert_eq!(result, meta);

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn emit_delivers_to_one_handler_per_group() {
    let bus = LocalBus::new();
    let publisher = broker(&bus, "publisher-node");
    publisher.start().await.unwrap();

    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel::<serde_json::Value>();
    let subscriber_a = broker(&bus, "subscriber-a");
    subscriber_a
        .register(ServiceSchema::new("watcherA").event(EventDef::new("created", move |ctx: Context| {
            let tx_a = tx_a.clone();
            async move {
                let _ = tx_a.send(ctx.params);
            }
        })))
        .await
        .unwrap();
    subscriber_a.start().await.unwrap();

    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel::<serde_json::Value>();
    let subscriber_b = broker(&bus, "subscriber-b");
    subscriber_b
        .register(ServiceSchema::new("watcherB").event(EventDef::new("created", move |ctx: Context| {
            let tx_b = tx_b.clone();
            async move {
                let _ = tx_b.send(ctx.params);
            }
        })))
        .await
        .unwrap();
    subscriber_b.start().await.unwrap();

    publisher.wait_for_services(&["watcherA", "watcherB"], Duration::from_secs(2)).await.unwrap();
    publisher.emit("watcherA.created", json!({"id": 1})).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx_a.recv()).await.unwrap();
    assert_eq!(received, Some(json!({"id": 1})));
    assert!(rx_b.try_recv().is_err(), "event for a different service's group must not fan out to it");

    publisher.stop().await.unwrap();
    subscriber_a.stop().await.unwrap();
    subscriber_b.stop().await.unwrap();
}
