//! WebSocket transport tests against a local server
//!
//! These tests verify:
//! - Handshake headers and the model query parameter
//! - Full session round trip over a real socket
//! - Ping handling and handshake timeouts

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use common::{WAIT, spawn_ws_server, wait_until};
use waav_realtime::core::realtime::openai::OpenAIRealtimeModel;
use waav_realtime::core::realtime::{
    RealtimeError, RealtimeSession, Transport, WebSocketTransport,
};

#[tokio::test]
async fn test_session_round_trip_over_websocket() {
    let (url, log) = spawn_ws_server().await;
    let transport = WebSocketTransport::new("sk-test", OpenAIRealtimeModel::default()).with_url(url);
    let session = RealtimeSession::new(Arc::new(transport));

    session.connect().await.unwrap();
    tokio::time::timeout(WAIT, session.wait_for_session_created())
        .await
        .expect("session.created should arrive")
        .unwrap();

    session.create_response().unwrap();
    assert!(wait_until(|| session.responses().len() == 1).await);
    assert_eq!(session.responses()[0].id, "resp_1");

    session.disconnect();
    assert!(!session.is_connected());

    let log = tokio::time::timeout(WAIT, log)
        .await
        .expect("server should see the close")
        .expect("server task ended early");

    assert_eq!(log.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(log.beta.as_deref(), Some("realtime=v1"));
    assert_eq!(
        log.path_and_query,
        "/v1/realtime?model=gpt-4o-realtime-preview"
    );

    let types: Vec<_> = log
        .received
        .iter()
        .filter_map(|message| message["type"].as_str())
        .filter(|event_type| *event_type != "pong")
        .collect();
    assert_eq!(types, vec!["session.update", "response.create"]);

    // The ping sent right after the handshake is answered
    assert!(
        log.received
            .iter()
            .any(|message| message["type"] == "pong" && message["payload"] == serde_json::json!([1, 2, 3]))
    );
}

#[tokio::test]
async fn test_handshake_timeout() {
    // Accepts TCP connections but never answers the upgrade
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let transport = WebSocketTransport::new("sk-test", OpenAIRealtimeModel::default())
        .with_url(format!("ws://{addr}/v1/realtime"))
        .with_connect_timeout(Duration::from_millis(100));

    let result = transport.connect().await;
    assert!(matches!(result, Err(RealtimeError::Timeout(_))));
}

#[tokio::test]
async fn test_refused_connection_leaves_session_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = WebSocketTransport::new("sk-test", OpenAIRealtimeModel::default())
        .with_url(format!("ws://{addr}/v1/realtime"));
    let session = RealtimeSession::new(Arc::new(transport));

    assert!(matches!(
        session.connect().await,
        Err(RealtimeError::ConnectionFailed(_))
    ));
    assert!(!session.is_connected());
}
