//! End-to-end tests over a real socket: WebSocket clients plus HTTP triggers.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use herald_server::{NotificationServer, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    server: Arc<NotificationServer>,
    serve: JoinHandle<()>,
    base: String,
    ws_url: String,
    http: reqwest::Client,
}

/// Boot a server on an ephemeral loopback port.
async fn boot_server() -> TestServer {
    boot_with(ServerConfig::default()).await
}

async fn boot_with(config: ServerConfig) -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..config
    };
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    let server = Arc::new(NotificationServer::new(config, metrics_handle));
    let (addr, serve) = server.listen().await.unwrap();
    TestServer {
        server,
        serve,
        base: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        http: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn connect(&self) -> WsStream {
        let (ws, _) = timeout(TIMEOUT, connect_async(self.ws_url.as_str()))
            .await
            .unwrap()
            .unwrap();
        ws
    }

    /// Connect and register, waiting until the registry reflects it.
    async fn connect_as(&self, user_id: &str) -> WsStream {
        let before = self.server.registry().lookup(user_id).len();
        let mut ws = self.connect().await;
        send_json(&mut ws, &json!({"type": "register", "userId": user_id})).await;
        self.wait_for(|s| s.registry().lookup(user_id).len() == before + 1)
            .await;
        ws
    }

    async fn wait_for(&self, cond: impl Fn(&NotificationServer) -> bool) {
        timeout(TIMEOUT, async {
            while !cond(&self.server) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn trigger(&self, body: &Value) -> (reqwest::StatusCode, Value) {
        let resp = self
            .http
            .post(format!("{}/send", self.base))
            .json(body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn recv_json(ws: &mut WsStream) -> Value {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("no message received")
}

/// Assert no text frame arrives within [`QUIET`].
async fn assert_silent(ws: &mut WsStream) {
    let result = timeout(QUIET, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => {}
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected push: {result:?}");
}

#[tokio::test]
async fn delivers_to_each_target() {
    let t = boot_server().await;
    let mut alice = t.connect_as("alice").await;
    let mut bob = t.connect_as("bob").await;

    let (status, body) = t
        .trigger(&json!({"userIds": ["alice", "bob"], "title": "Hi", "message": "test"}))
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["sentTo"], json!(["alice", "bob"]));

    for ws in [&mut alice, &mut bob] {
        let msg = recv_json(ws).await;
        assert_eq!(msg, json!({"type": "notification", "title": "Hi", "message": "test"}));
    }
}

#[tokio::test]
async fn sender_sessions_are_excluded() {
    let t = boot_server().await;
    let mut a1 = t.connect_as("alice").await;
    let mut a2 = t.connect_as("alice").await;
    let mut bob = t.connect_as("bob").await;

    let (status, body) = t
        .trigger(&json!({
            "userIds": ["alice", "bob"],
            "title": "Hi",
            "message": "test",
            "senderId": "alice"
        }))
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["senderId"], "alice");

    let msg = recv_json(&mut bob).await;
    assert_eq!(msg["senderId"], "alice");
    assert_silent(&mut a1).await;
    assert_silent(&mut a2).await;
}

#[tokio::test]
async fn every_session_of_target_receives() {
    let t = boot_server().await;
    let mut a1 = t.connect_as("alice").await;
    let mut a2 = t.connect_as("alice").await;

    let _ = t
        .trigger(&json!({"userIds": ["alice"], "title": "T", "message": "M", "senderId": "bob"}))
        .await;
    assert_eq!(recv_json(&mut a1).await["title"], "T");
    assert_eq!(recv_json(&mut a2).await["title"], "T");
}

#[tokio::test]
async fn invalid_trigger_pushes_nothing() {
    let t = boot_server().await;
    let mut alice = t.connect_as("alice").await;

    let (status, body) = t.trigger(&json!({"title": "T", "message": "M"})).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "userIds[] array is required");

    let (status, _) = t.trigger(&json!({"userIds": ["alice"], "title": "T"})).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn disconnected_client_is_unregistered() {
    let t = boot_server().await;
    let mut alice = t.connect_as("alice").await;
    alice.close(None).await.unwrap();

    t.wait_for(|s| s.registry().lookup("alice").is_empty() && s.registry().connection_count() == 0)
        .await;

    let (status, _) = t
        .trigger(&json!({"userIds": ["alice"], "title": "T", "message": "M"}))
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
}

#[tokio::test]
async fn malformed_message_keeps_connection_open() {
    let t = boot_server().await;
    let mut ws = t.connect().await;
    ws.send(Message::Text("not json".to_string().into())).await.unwrap();
    send_json(&mut ws, &json!({"type": "subscribe"})).await;
    send_json(&mut ws, &json!({"type": "register", "userId": ""})).await;
    send_json(&mut ws, &json!({"type": "register", "userId": "alice"})).await;
    t.wait_for(|s| s.registry().lookup("alice").len() == 1).await;

    let _ = t
        .trigger(&json!({"userIds": ["alice"], "title": "T", "message": "M"}))
        .await;
    assert_eq!(recv_json(&mut ws).await["message"], "M");
}

#[tokio::test]
async fn unregistered_client_receives_nothing() {
    let t = boot_server().await;
    let mut ws = t.connect().await;
    t.wait_for(|s| s.registry().connection_count() == 1).await;

    let (status, _) = t
        .trigger(&json!({"userIds": ["alice"], "title": "T", "message": "M"}))
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn reregistration_moves_connection() {
    let t = boot_server().await;
    let mut ws = t.connect_as("alice").await;
    send_json(&mut ws, &json!({"type": "register", "userId": "bob"})).await;
    t.wait_for(|s| s.registry().lookup("bob").len() == 1).await;
    assert!(t.server.registry().lookup("alice").is_empty());

    let _ = t
        .trigger(&json!({"userIds": ["alice", "bob"], "title": "T", "message": "M"}))
        .await;
    assert_eq!(recv_json(&mut ws).await["title"], "T");
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn upgrade_accepted_on_any_path() {
    let t = boot_server().await;
    let root = t.ws_url.trim_end_matches("/ws").to_string();
    for (i, path) in ["", "/", "/notifications/live"].into_iter().enumerate() {
        let url = format!("{root}{path}");
        let (mut ws, _) = timeout(TIMEOUT, connect_async(url.as_str()))
            .await
            .unwrap()
            .unwrap_or_else(|e| panic!("upgrade on {url:?} failed: {e}"));
        send_json(&mut ws, &json!({"type": "register", "userId": "pathless"})).await;
        t.wait_for(|s| s.registry().lookup("pathless").len() == i + 1).await;
    }
}

#[tokio::test]
async fn connection_limit_refuses_upgrade() {
    let t = boot_with(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let _first = t.connect().await;
    t.wait_for(|s| s.registry().connection_count() == 1).await;

    let second = timeout(TIMEOUT, connect_async(t.ws_url.as_str())).await.unwrap();
    assert!(second.is_err());
}

#[tokio::test]
async fn concurrent_upgrades_respect_limit() {
    let t = boot_with(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;

    let attempts = (0..8).map(|_| connect_async(t.ws_url.as_str()));
    let results = timeout(TIMEOUT, futures::future::join_all(attempts))
        .await
        .unwrap();
    let accepted: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(accepted.len(), 1);

    t.wait_for(|s| s.registry().connection_count() == 1).await;
    tokio::time::sleep(QUIET).await;
    assert_eq!(t.server.registry().connection_count(), 1);
}

#[tokio::test]
async fn health_reports_counts() {
    let t = boot_server().await;
    let _alice = t.connect_as("alice").await;
    let _anon = t.connect().await;
    t.wait_for(|s| s.registry().connection_count() == 2).await;

    let body: Value = t
        .http
        .get(format!("{}/health", t.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["identities"], 1);
}

#[tokio::test]
async fn graceful_shutdown_drains_sessions() {
    let t = boot_server().await;
    let mut alice = t.connect_as("alice").await;
    let _anon = t.connect().await;
    t.wait_for(|s| s.registry().connection_count() == 2).await;

    let TestServer { server, serve, .. } = t;
    assert!(server.shutdown().graceful_shutdown(serve, Some(TIMEOUT)).await);

    // Nothing left to wait for once the drain returns.
    assert_eq!(server.registry().connection_count(), 0);
    assert_eq!(server.registry().identity_count(), 0);
    assert_eq!(server.shutdown().active_sessions(), 0);

    let closed = timeout(TIMEOUT, async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
