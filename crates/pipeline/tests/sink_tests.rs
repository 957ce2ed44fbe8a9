//! Built-in sinks driven through the registry and the output handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{head, post};
use logferry_core::config::{InOutDefinition, Params};
use logferry_core::message::Message;
use logferry_core::registry::Registry;
use logferry_pipeline::{
    DynOutput, InstanceState, OutputContext, OutputFactory, build_output,
    register_builtin_outputs,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

fn registry() -> Registry<OutputFactory> {
    let mut registry = Registry::new("output");
    register_builtin_outputs(&mut registry);
    registry
}

fn build(kind: &str, params: Params, ctx: &OutputContext) -> Arc<dyn DynOutput> {
    build_output(&registry(), ctx, &InOutDefinition::new(kind, params)).unwrap()
}

/// Enqueues `payloads`, closes and runs to completion.
async fn deliver(output: &Arc<dyn DynOutput>, payloads: &[&str]) {
    for payload in payloads {
        assert!(output.enqueue(Message::new(payload.to_string())));
    }
    output.close();
    output.run().await.unwrap();
    assert_eq!(output.state(), InstanceState::Closed);
}

/// Dynamic file path: each tenant gets its own file.
#[tokio::test]
async fn test_file_sink_routes_by_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let params = Params::new()
        .with("path", format!("{}/{{{{$.tenant}}}}/out.log", dir.path().display()))
        .with("chunk_size", 2);
    let output = build("fileout", params, &OutputContext::new());

    deliver(
        &output,
        &[
            r#"{"tenant":"x","v":1}"#,
            r#"{"tenant":"y","v":2}"#,
            r#"{"tenant":"x","v":3}"#,
        ],
    )
    .await;

    let x = tokio::fs::read_to_string(dir.path().join("x/out.log")).await.unwrap();
    let y = tokio::fs::read_to_string(dir.path().join("y/out.log")).await.unwrap();
    assert_eq!(x, "{\"tenant\":\"x\",\"v\":1}\n{\"tenant\":\"x\",\"v\":3}\n");
    assert_eq!(y, "{\"tenant\":\"y\",\"v\":2}\n");
}

/// Static file path with attributes: payloads are written unchanged.
#[tokio::test]
async fn test_file_sink_static_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("static.log");
    let params = Params::new().with("path", file.display().to_string());
    let output = build("file", params, &OutputContext::new());

    deliver(&output, &["one", "two"]).await;

    assert_eq!(tokio::fs::read_to_string(&file).await.unwrap(), "one\ntwo\n");
}

/// TCP sink writes newline-framed payloads to one stream.
#[tokio::test]
async fn test_tcp_sink_writes_lines() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let reader = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let mut received = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            received.push(line);
        }
        received
    });

    let output = build(
        "tcpout",
        Params::new().with("server", addr.to_string()),
        &OutputContext::new(),
    );
    deliver(&output, &["alpha", "beta", "gamma"]).await;

    // the sink shuts the stream down on close
    let received = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, vec!["alpha", "beta", "gamma"]);
}

#[derive(Default)]
struct MockServerState {
    requests: Mutex<Vec<(HeaderMap, Bytes)>>,
    health_checks: std::sync::atomic::AtomicUsize,
}

async fn handle_ingest(
    State(state): State<Arc<MockServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.requests.lock().await.push((headers, body));
    StatusCode::OK
}

async fn handle_health(State(state): State<Arc<MockServerState>>) -> StatusCode {
    state
        .health_checks
        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    StatusCode::OK
}

async fn handle_reject() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn start_mock_server() -> (SocketAddr, Arc<MockServerState>) {
    let state = Arc::new(MockServerState::default());
    let app = Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/reject", post(handle_reject))
        .route("/health", head(handle_health))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// Webhook sink: probe once, POST every message, attributes become headers.
#[tokio::test]
async fn test_http_sink_posts_with_attributes() {
    let (addr, state) = start_mock_server().await;
    let params = Params::new()
        .with("url", format!("http://{addr}/ingest"))
        .with("health_url", format!("http://{addr}/health"))
        .with("attribute.env", "prod");
    let output = build("webhook", params, &OutputContext::new());

    deliver(&output, &[r#"{"n":1}"#, r#"{"n":2}"#]).await;

    let requests = state.requests.lock().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(&requests[0].1[..], br#"{"n":1}"#);
    assert_eq!(&requests[1].1[..], br#"{"n":2}"#);
    assert_eq!(requests[0].0.get("env").unwrap(), "prod");
    assert_eq!(requests[0].0.get("content-type").unwrap(), "application/json");
    assert_eq!(
        state.health_checks.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

/// A failing endpoint is logged and counted; close still completes.
#[tokio::test]
async fn test_http_sink_failure_does_not_block_close() {
    let (addr, _state) = start_mock_server().await;
    let params = Params::new().with("url", format!("http://{addr}/reject"));
    let output = build("http", params, &OutputContext::new());

    tokio::time::timeout(Duration::from_secs(10), deliver(&output, &["a", "b"]))
        .await
        .expect("close did not complete");
}

/// Outputs naming the same pool borrow one client; pool teardown is separate.
#[tokio::test]
async fn test_http_pool_outlives_outputs() {
    let (addr, state) = start_mock_server().await;
    let ctx = OutputContext::new();
    let params = Params::new()
        .with("url", format!("http://{addr}/ingest"))
        .with("pool_name", "shared");

    let a = build("http", params.clone(), &ctx);
    let b = build("http", params, &ctx);
    deliver(&a, &["from-a"]).await;
    deliver(&b, &["from-b"]).await;

    assert_eq!(ctx.http_clients.len(), 1);
    assert_eq!(state.requests.lock().await.len(), 2);
    ctx.shutdown();
    assert!(ctx.http_clients.is_empty());
}
