//! WebSocket end-to-end tests against a real listener.

#![cfg(unix)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shell_relay::api::{serve_with_shutdown, AppState, Keepalive, StaticTokens};
use shell_relay::session::{RegistryConfig, SessionRegistry, TerminalKey};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<shell_relay::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(Keepalive::default()).await
    }

    async fn start_with(keepalive: Keepalive) -> Self {
        let registry = Arc::new(SessionRegistry::new(RegistryConfig {
            shell: "/bin/sh".into(),
            ..RegistryConfig::default()
        }));
        let auth = StaticTokens::default().with_token("alice-token", "alice");
        let state = AppState::new(registry.clone(), Arc::new(auth)).with_keepalive(keepalive);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve_with_shutdown(listener, state, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            registry,
            stop: Some(stop),
            task,
        }
    }

    fn url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    async fn connect(&self) -> Socket {
        let (socket, _) = connect_async(self.url("alice-token")).await.unwrap();
        socket
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(WAIT, &mut self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn send(socket: &mut Socket, message: Value) {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(socket: &mut Socket) -> Value {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let frame = tokio::time::timeout_at(deadline, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Read messages until one of `kind` arrives. Data is accumulated.
async fn until(socket: &mut Socket, kind: &str, data: &mut String) -> Value {
    loop {
        let message = next_json(socket).await;
        if message["type"] == "terminal.data" {
            data.push_str(message["data"].as_str().unwrap());
        }
        if message["type"] == kind {
            return message;
        }
    }
}

async fn data_until(socket: &mut Socket, needle: &str) -> String {
    let mut data = String::new();
    while !data.contains(needle) {
        let message = next_json(socket).await;
        if message["type"] == "terminal.data" {
            data.push_str(message["data"].as_str().unwrap());
        }
    }
    data
}

fn attached(registry: &SessionRegistry) -> bool {
    registry
        .sessions_for("alice")
        .first()
        .map(|s| s.attached)
        .unwrap_or(false)
}

const QUICK: Keepalive = Keepalive {
    interval: Duration::from_millis(100),
    timeout: Duration::from_millis(100),
};

#[tokio::test]
async fn test_silent_client_is_detached() {
    let server = TestServer::start_with(QUICK).await;
    let mut socket = server.connect().await;
    send(
        &mut socket,
        json!({"type": "terminal.create", "clientTerminalId": "t1"}),
    )
    .await;
    let mut seen = String::new();
    until(&mut socket, "terminal.ready", &mut seen).await;
    assert!(attached(&server.registry));

    // Stop reading: pings go unanswered.
    let deadline = tokio::time::Instant::now() + WAIT;
    while attached(&server.registry) {
        assert!(tokio::time::Instant::now() < deadline, "session never detached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(server.registry.contains(&TerminalKey::new("alice", "t1")));

    drop(socket);
    server.stop().await;
}

#[tokio::test]
async fn test_chatty_client_stays_attached() {
    let server = TestServer::start_with(QUICK).await;
    let mut socket = server.connect().await;
    send(
        &mut socket,
        json!({"type": "terminal.create", "clientTerminalId": "t1"}),
    )
    .await;
    let mut seen = String::new();
    until(&mut socket, "terminal.ready", &mut seen).await;

    for _ in 0..20 {
        send(&mut socket, json!({"type": "ping"})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(attached(&server.registry));

    drop(socket);
    server.stop().await;
}

#[tokio::test]
async fn test_upgrade_requires_valid_token() {
    let server = TestServer::start().await;

    for url in [server.url("mallory"), format!("ws://{}/ws", server.addr)] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 401);
            }
            other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn test_ping_and_garbage() {
    let server = TestServer::start().await;
    let mut socket = server.connect().await;

    socket.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let frame = tokio::time::timeout_at(deadline, socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Pong(payload) = frame {
            assert_eq!(payload.to_vec(), vec![1, 2, 3]);
            break;
        }
    }

    socket.send(Message::Text("not json".into())).await.unwrap();
    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "terminal.error");
    assert_eq!(error["code"], "INVALID_INPUT");

    // The connection survives a bad frame.
    send(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut socket).await["type"], "pong");

    drop(socket);
    server.stop().await;
}

#[tokio::test]
async fn test_terminal_round_trip_and_resume() {
    let server = TestServer::start().await;
    let key = TerminalKey::new("alice", "web-1");

    let mut socket = server.connect().await;
    send(
        &mut socket,
        json!({"type": "terminal.create", "clientTerminalId": "web-1", "cols": 100, "rows": 30}),
    )
    .await;
    let mut seen = String::new();
    let ready = until(&mut socket, "terminal.ready", &mut seen).await;
    assert_eq!(ready["isNew"], true);
    let token = ready["resumptionToken"].as_str().unwrap().to_string();
    let pid = ready["pid"].as_u64().unwrap();

    send(
        &mut socket,
        json!({"type": "terminal.input", "clientTerminalId": "web-1", "data": "echo \"ws\"\"-ok\"\r"}),
    )
    .await;
    data_until(&mut socket, "ws-ok").await;

    // Dropping the socket detaches; the shell keeps running.
    socket.close(None).await.unwrap();
    drop(socket);
    let deadline = tokio::time::Instant::now() + WAIT;
    while attached(&server.registry) {
        assert!(tokio::time::Instant::now() < deadline, "session never detached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(server.registry.contains(&key));

    let mut socket = server.connect().await;
    send(
        &mut socket,
        json!({
            "type": "terminal.create",
            "clientTerminalId": "web-1",
            "cols": 100,
            "rows": 30,
            "resumptionToken": token,
        }),
    )
    .await;
    let mut seen = String::new();
    let ready = until(&mut socket, "terminal.ready", &mut seen).await;
    assert_eq!(ready["isNew"], false);
    assert_eq!(ready["pid"].as_u64().unwrap(), pid);

    send(
        &mut socket,
        json!({"type": "terminal.close", "clientTerminalId": "web-1"}),
    )
    .await;
    send(&mut socket, json!({"type": "ping"})).await;
    let mut seen = String::new();
    until(&mut socket, "pong", &mut seen).await;
    assert!(!server.registry.contains(&key));

    drop(socket);
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_destroys_sessions() {
    let server = TestServer::start().await;
    let registry = server.registry.clone();

    let mut socket = server.connect().await;
    send(
        &mut socket,
        json!({"type": "terminal.create", "clientTerminalId": "t1"}),
    )
    .await;
    let mut seen = String::new();
    until(&mut socket, "terminal.ready", &mut seen).await;
    assert_eq!(registry.count(), 1);

    drop(socket);
    server.stop().await;
    assert_eq!(registry.count(), 0);
}
