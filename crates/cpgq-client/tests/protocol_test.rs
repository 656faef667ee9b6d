//! Integration tests for the submit / notify / fetch exchange.
//!
//! HTTP endpoints are served by wiremock; the notification channel is a
//! tokio-tungstenite acceptor on a local port that replays a scripted list of
//! messages to every connection, the way a shared channel would.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cpgq_client::{ClientConfig, ProtocolClient};
use cpgq_core::{Error, ProtocolError};

/// Start a notification server and return its `ws://` URL.
///
/// Each connection receives `handshake`, then each scripted message after its
/// delay, then stays open until the client hangs up.
async fn spawn_notifier(handshake: &str, script: Vec<(u64, &str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handshake = handshake.to_string();
    let script: Vec<(u64, String)> = script
        .into_iter()
        .map(|(delay, msg)| (delay, msg.to_string()))
        .collect();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handshake = handshake.clone();
            let script = script.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                if ws.send(Message::Text(handshake)).await.is_err() {
                    return;
                }
                for (delay, msg) in script {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    if ws.send(Message::Text(msg)).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    format!("ws://{}/connect", addr)
}

fn client_for(http: &MockServer, ws_url: String) -> ProtocolClient {
    let config = ClientConfig {
        base_url: http.uri(),
        ws_url,
        ..ClientConfig::default()
    };
    ProtocolClient::new(config).expect("Failed to create client")
}

async fn mount_submit(server: &MockServer, query: &str, token: &str) {
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_partial_json(json!({ "query": query })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uuid": token })))
        .mount(server)
        .await;
}

async fn mount_result(server: &MockServer, token: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/result/{}", token)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_execute_returns_stdout_on_success() {
    let server = MockServer::start().await;
    mount_submit(&server, "cpg.method.name.toJson", "tok-1").await;
    mount_result(
        &server,
        "tok-1",
        json!({ "success": true, "uuid": "tok-1", "stdout": "[\"main\"]", "stderr": "" }),
    )
    .await;
    let ws_url = spawn_notifier("connected", vec![(20, "tok-1")]).await;

    let client = client_for(&server, ws_url);
    let result = client
        .execute("cpg.method.name.toJson", Duration::from_secs(5))
        .await
        .unwrap();

    assert!(result.ok);
    assert_eq!(result.payload, "[\"main\"]");
    assert_eq!(client.available_exchanges(), 5);
}

#[tokio::test]
async fn test_backend_error_is_result_not_exception() {
    let server = MockServer::start().await;
    mount_submit(&server, "cpg.bogus", "tok-err").await;
    mount_result(&server, "tok-err", json!({ "err": "value bogus is not a member of Cpg" })).await;
    let ws_url = spawn_notifier("connected", vec![(10, "tok-err")]).await;

    let client = client_for(&server, ws_url);
    let result = client.execute("cpg.bogus", Duration::from_secs(5)).await.unwrap();

    assert!(!result.ok);
    assert_eq!(result.error_text, "value bogus is not a member of Cpg");
}

#[tokio::test]
async fn test_handshake_mismatch_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uuid": "x" })))
        .expect(0)
        .mount(&server)
        .await;
    let ws_url = spawn_notifier("hello", vec![]).await;

    let client = client_for(&server, ws_url);
    let err = client.execute("cpg.method", Duration::from_secs(5)).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::Handshake { ref received }) if received == "hello"
    ));
}

#[tokio::test]
async fn test_submit_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let ws_url = spawn_notifier("connected", vec![]).await;

    let client = client_for(&server, ws_url);
    let err = client.execute("cpg.method", Duration::from_secs(5)).await.unwrap_err();

    assert!(matches!(err, Error::Protocol(ProtocolError::Unauthorized)));
}

#[tokio::test]
async fn test_submit_server_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("workspace locked"))
        .mount(&server)
        .await;
    let ws_url = spawn_notifier("connected", vec![]).await;

    let client = client_for(&server, ws_url);
    let err = client.execute("cpg.method", Duration::from_secs(5)).await.unwrap_err();

    match err {
        Error::Protocol(ProtocolError::Status { endpoint, status, body }) => {
            assert_eq!(endpoint, "/query");
            assert_eq!(status, 500);
            assert_eq!(body, "workspace locked");
        }
        other => panic!("Expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_accepted_without_ok_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "uuid": "tok-202" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result/tok-202"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let ws_url = spawn_notifier("connected", vec![(10, "tok-202")]).await;

    let client = client_for(&server, ws_url);
    let err = client.execute("cpg.method", Duration::from_secs(5)).await.unwrap_err();

    match err {
        Error::Protocol(ProtocolError::Status { endpoint, status, .. }) => {
            assert_eq!(endpoint, "/query");
            assert_eq!(status, 202);
        }
        other => panic!("Expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_failure_is_protocol_error() {
    let server = MockServer::start().await;
    mount_submit(&server, "cpg.method", "tok-gone").await;
    Mock::given(method("GET"))
        .and(path("/result/tok-gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no result"))
        .mount(&server)
        .await;
    let ws_url = spawn_notifier("connected", vec![(10, "tok-gone")]).await;

    let client = client_for(&server, ws_url);
    let err = client.execute("cpg.method", Duration::from_secs(5)).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::Status { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_timeout_when_completion_never_arrives() {
    let server = MockServer::start().await;
    mount_submit(&server, "cpg.method", "tok-slow").await;
    let ws_url = spawn_notifier("connected", vec![]).await;

    let client = client_for(&server, ws_url);
    let budget = Duration::from_millis(300);
    let started = Instant::now();
    let err = client.execute("cpg.method", budget).await.unwrap_err();

    assert!(matches!(err, Error::Timeout(d) if d == budget));
    assert!(started.elapsed() < Duration::from_secs(3));
    // The gate slot is returned on the timeout path too
    assert_eq!(client.available_exchanges(), 5);
}

#[tokio::test]
async fn test_foreign_completion_does_not_finish_exchange() {
    let server = MockServer::start().await;
    mount_submit(&server, "query-a", "tok-a").await;
    Mock::given(method("GET"))
        .and(path("/result/tok-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "stdout": "a" })))
        .expect(0)
        .mount(&server)
        .await;
    // Only somebody else's completion ever shows up
    let ws_url = spawn_notifier("connected", vec![(20, "tok-b")]).await;

    let client = client_for(&server, ws_url);
    let err = client
        .execute("query-a", Duration::from_millis(400))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn test_concurrent_exchanges_match_their_own_tokens() {
    let server = MockServer::start().await;
    mount_submit(&server, "query-a", "tok-a").await;
    mount_submit(&server, "query-b", "tok-b").await;
    mount_result(&server, "tok-a", json!({ "success": true, "stdout": "result-a" })).await;
    mount_result(&server, "tok-b", json!({ "success": true, "stdout": "result-b" })).await;
    // B completes before A on every connection
    let ws_url = spawn_notifier("connected", vec![(50, "tok-b"), (150, "tok-a")]).await;

    let client = client_for(&server, ws_url);
    let started = Instant::now();
    let (a, b) = tokio::join!(
        client.execute("query-a", Duration::from_secs(5)),
        client.execute("query-b", Duration::from_secs(5)),
    );

    assert_eq!(a.unwrap().payload, "result-a");
    assert_eq!(b.unwrap().payload, "result-b");
    // A had to wait past B's notification for its own
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_basic_auth_sent_on_both_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uuid": "tok-auth" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result/tok-auth"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "stdout": "ok" })))
        .expect(1)
        .mount(&server)
        .await;
    let ws_url = spawn_notifier("connected", vec![(10, "tok-auth")]).await;

    let config = ClientConfig {
        base_url: server.uri(),
        ws_url,
        ..ClientConfig::default()
    }
    .with_credentials("user", "pass");
    let client = ProtocolClient::new(config).unwrap();

    let result = client.execute("cpg.method", Duration::from_secs(5)).await.unwrap();
    assert_eq!(result.payload, "ok");
}

#[tokio::test]
async fn test_gate_serializes_exchanges_beyond_limit() {
    let server = MockServer::start().await;
    mount_submit(&server, "query-a", "tok-a").await;
    mount_submit(&server, "query-b", "tok-b").await;
    mount_result(&server, "tok-a", json!({ "success": true, "stdout": "a" })).await;
    mount_result(&server, "tok-b", json!({ "success": true, "stdout": "b" })).await;
    // Each connection sees both completions 100ms after connecting
    let ws_url = spawn_notifier("connected", vec![(100, "tok-a"), (0, "tok-b")]).await;

    let config = ClientConfig {
        base_url: server.uri(),
        ws_url,
        ..ClientConfig::default()
    }
    .with_max_exchanges(1);
    let client = ProtocolClient::new(config).unwrap();

    let started = Instant::now();
    let (a, b) = tokio::join!(
        client.execute("query-a", Duration::from_secs(5)),
        client.execute("query-b", Duration::from_secs(5)),
    );

    assert!(a.unwrap().ok);
    assert!(b.unwrap().ok);
    // The second exchange could only open its channel after the first finished
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(client.available_exchanges(), 1);
}
