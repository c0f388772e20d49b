//! Subscriber protocol over a real WebSocket connection

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use telemetry_gateway::{
    Snapshot,
    config::ServerConfig,
    server::{AppState, spawn_server},
    subscription::{INVALID_REQUEST, NOT_FOUND, SubscriberResponse, SubscriptionHandler},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::helpers::*;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(gateway: &TestGateway) -> String {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enable_cors: false,
    };
    let subscriptions =
        SubscriptionHandler::new(gateway.store.clone(), gateway.broadcaster.clone());
    let state = AppState::new(
        gateway.store.clone(),
        gateway.broadcaster.clone(),
        subscriptions,
    );
    let addr = spawn_server(&config, state).await.unwrap();
    format!("127.0.0.1:{}", addr.port())
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame received")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return text;
        }
    }
}

async fn wait_for_subscribers(gateway: &TestGateway, count: usize) {
    for _ in 0..100 {
        if gateway.broadcaster.subscriber_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} subscribers");
}

#[tokio::test]
async fn test_lookup_push_and_disconnect() {
    let gateway = gateway_with(None, None);
    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(7, 150.0))
        .await
        .unwrap();
    let addr = start(&gateway).await;

    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    client
        .send(Message::Text(r#"{"id": 7}"#.to_string()))
        .await
        .unwrap();
    let reply: SubscriberResponse = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(reply.error, None);
    assert_eq!(reply.data.unwrap().gas_inflamable, 150.0);

    client
        .send(Message::Text(r#"{"id": 8}"#.to_string()))
        .await
        .unwrap();
    let reply: SubscriberResponse = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(reply, SubscriberResponse::error(NOT_FOUND));

    client
        .send(Message::Text("garbage".to_string()))
        .await
        .unwrap();
    let reply: SubscriberResponse = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(reply, SubscriberResponse::error(INVALID_REQUEST));

    // Pushes arrive as bare snapshots
    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(11, 20.0))
        .await
        .unwrap();
    let pushed: Snapshot = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(pushed.id, 11);

    client.close(None).await.unwrap();
    wait_for_subscribers(&gateway, 0).await;
}

#[tokio::test]
async fn test_every_connection_gets_pushes() {
    let gateway = gateway_with(None, None);
    let addr = start(&gateway).await;

    let (mut first, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (mut second, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    wait_for_subscribers(&gateway, 2).await;

    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(5, 1.5))
        .await
        .unwrap();

    for client in [&mut first, &mut second] {
        let pushed: Snapshot = serde_json::from_str(&next_text(client).await).unwrap();
        assert_eq!(pushed.id, 5);
    }

    drop(first);
    wait_for_subscribers(&gateway, 1).await;
}

#[tokio::test]
async fn test_health_reports_sizes() {
    let gateway = gateway_with(None, None);
    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(1, 1.0))
        .await
        .unwrap();
    let addr = start(&gateway).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["devices"], 1);
    assert_eq!(body["subscribers"], 0);
}
