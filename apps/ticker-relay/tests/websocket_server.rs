//! WebSocket Server Integration Tests
//!
//! Runs `RelayServer` on an ephemeral port and talks to it with a real
//! WebSocket client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use common::{Relay, binance_trade, eventually};
use ticker_relay::{RelayServer, ServerState};

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    relay: Relay,
    addr: std::net::SocketAddr,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

async fn start_server() -> TestServer {
    let relay = Relay::new(None);
    let cancel = CancellationToken::new();

    let state = Arc::new(ServerState::new(
        Arc::clone(&relay.tickers),
        Arc::clone(&relay.crypto_gateway),
        64,
        cancel.clone(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RelayServer::new(0, state, cancel.clone());

    let handle = tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    TestServer {
        relay,
        addr,
        cancel,
        handle,
    }
}

async fn open_client(addr: std::net::SocketAddr, path: &str) -> (Client, String) {
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .unwrap();

    let ready = next_json(&mut client).await;
    assert_eq!(ready["event"], "ready");
    let id = ready["data"]["id"].as_str().unwrap().to_string();
    (client, id)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(client: &mut Client, value: &Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ready_carries_unique_session_ids() {
    let server = start_server().await;

    let (_a, id_a) = open_client(server.addr, "/tickers").await;
    let (_b, id_b) = open_client(server.addr, "/tickers").await;

    assert!(uuid::Uuid::parse_str(&id_a).is_ok());
    assert_ne!(id_a, id_b);
    eventually(|| server.relay.tickers.session_count() == 2).await;
}

#[tokio::test]
async fn test_subscribe_and_receive_tick_over_websocket() {
    let server = start_server().await;
    let (mut client, _) = open_client(server.addr, "/tickers").await;

    send_json(
        &mut client,
        &json!({"event": "subscribe", "data": {"symbol": "btcusdt"}}),
    )
    .await;

    let ack = next_json(&mut client).await;
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["data"]["symbol"], "BTCUSDT");
    assert_eq!(ack["data"]["source"], "crypto");
    assert_eq!(ack["data"]["already"], false);

    eventually(|| server.relay.crypto.live() == 1).await;
    server
        .relay
        .crypto
        .push("BTCUSDT", binance_trade("BTCUSDT", "64000.10", 1_700_000_000_000));

    let tick = next_json(&mut client).await;
    assert_eq!(tick["event"], "tick");
    assert_eq!(tick["data"]["kind"], "trade");
    assert_eq!(tick["data"]["price"], "64000.10");
    assert_eq!(tick["data"]["provider"], "crypto");
}

#[tokio::test]
async fn test_malformed_frames_get_error_events() {
    let server = start_server().await;
    let (mut client, _) = open_client(server.addr, "/tickers").await;

    client
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    let err = next_json(&mut client).await;
    assert_eq!(err["event"], "error");
    assert!(err["data"]["message"].as_str().unwrap().starts_with("malformed command"));

    send_json(&mut client, &json!({"event": "explode", "data": {}})).await;
    assert_eq!(next_json(&mut client).await["event"], "error");

    client
        .send(Message::Binary(vec![1_u8, 2, 3].into()))
        .await
        .unwrap();
    let err = next_json(&mut client).await;
    assert_eq!(err["data"]["message"], "unsupported frame: binary");

    // The connection survives bad input.
    send_json(
        &mut client,
        &json!({"event": "subscribe", "data": {"symbol": "ETHUSDT"}}),
    )
    .await;
    assert_eq!(next_json(&mut client).await["event"], "subscribed");
}

#[tokio::test]
async fn test_client_close_releases_subscriptions() {
    let server = start_server().await;
    let (mut client, _) = open_client(server.addr, "/crypto").await;

    send_json(
        &mut client,
        &json!({"event": "subscribe", "data": {"symbol": "SOLUSDT"}}),
    )
    .await;
    assert_eq!(next_json(&mut client).await["event"], "subscribed");
    eventually(|| server.relay.crypto.live() == 1).await;

    client.close(None).await.unwrap();

    eventually(|| server.relay.crypto_gateway.session_count() == 0).await;
    eventually(|| server.relay.crypto.live() == 0).await;
}

#[tokio::test]
async fn test_crypto_endpoint_emits_complete() {
    let server = start_server().await;
    let (mut client, _) = open_client(server.addr, "/crypto").await;

    send_json(
        &mut client,
        &json!({"event": "subscribe", "data": {"symbol": "BTCUSDT"}}),
    )
    .await;
    assert_eq!(next_json(&mut client).await["event"], "subscribed");
    eventually(|| server.relay.crypto.live() == 1).await;

    server.relay.crypto.end("BTCUSDT");

    let complete = next_json(&mut client).await;
    assert_eq!(complete["event"], "complete");
    assert_eq!(complete["data"]["symbol"], "BTCUSDT");
}

#[tokio::test]
async fn test_unknown_path_is_not_upgraded() {
    let server = start_server().await;

    let result = tokio_tungstenite::connect_async(format!("ws://{}/stocks", server.addr)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancel_stops_server_and_sessions() {
    let server = start_server().await;
    let (_client, _) = open_client(server.addr, "/tickers").await;
    eventually(|| server.relay.tickers.session_count() == 1).await;

    server.cancel.cancel();

    eventually(|| server.relay.tickers.session_count() == 0).await;
    timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap();
}
