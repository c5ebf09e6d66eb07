// Each integration test file is a separate binary; helpers not used in every
// binary would otherwise trigger dead_code warnings.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::{stream, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use swecc_sockets::auth::{sign_token, Claims};
use swecc_sockets::handlers;
use swecc_sockets::runtime::{ContainerLogSource, LogChunkStream, LogSourceError};
use swecc_sockets::state::AppState;
use swecc_sockets::websocket;

pub const TEST_JWT_SECRET: &str = "test-secret-min-32-characters-long!!";

// ============================================================================
// Scripted container runtime
// ============================================================================

/// Hands out pre-scripted chunk streams by container name; unknown names
/// report NotFound like the real runtime. Each name can be opened once.
pub struct ScriptedLogSource {
    streams: std::sync::Mutex<HashMap<String, LogChunkStream>>,
}

impl ScriptedLogSource {
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedLogSource {
            streams: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// A stream that yields the chunks and then ends.
    pub fn insert_finite(self: &Arc<Self>, container: &str, chunks: &[&str]) {
        let items: Vec<Result<Bytes, LogSourceError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        self.streams
            .lock()
            .unwrap()
            .insert(container.to_string(), Box::pin(stream::iter(items)));
    }

    /// A stream that yields the chunks and then stays open until cancelled.
    pub fn insert_endless(self: &Arc<Self>, container: &str, chunks: &[&str]) {
        let items: Vec<Result<Bytes, LogSourceError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        self.streams.lock().unwrap().insert(
            container.to_string(),
            Box::pin(stream::iter(items).chain(stream::pending())),
        );
    }
}

#[async_trait]
impl ContainerLogSource for ScriptedLogSource {
    async fn open(&self, container: &str) -> Result<LogChunkStream, LogSourceError> {
        self.streams
            .lock()
            .unwrap()
            .remove(container)
            .ok_or_else(|| LogSourceError::NotFound(container.to_string()))
    }
}

// ============================================================================
// Gateway assembly
// ============================================================================

/// Build the gateway router exactly as main does.
pub async fn build_app(source: Arc<ScriptedLogSource>) -> Router {
    let state = AppState::new(TEST_JWT_SECRET);
    handlers::register_all(&state, source).await;
    Router::new()
        .route("/", get(handlers::root_status))
        .route("/ping", get(handlers::ping))
        .route("/ws/:service/:token", get(websocket::websocket_endpoint))
        .with_state(state)
}

/// Serve the gateway on an ephemeral loopback port; returns its address.
pub async fn spawn_gateway(source: Arc<ScriptedLogSource>) -> SocketAddr {
    let app = build_app(source).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server died");
    });
    addr
}

pub fn make_token(user_id: u64, username: &str, groups: &[&str]) -> String {
    let claims = Claims::new(
        user_id,
        username,
        groups.iter().map(|s| s.to_string()).collect(),
        15,
    );
    sign_token(&claims, TEST_JWT_SECRET).expect("sign_token should succeed")
}

// ============================================================================
// WebSocket client helpers
// ============================================================================

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(addr: SocketAddr, service: &str, token: &str) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/{service}/{token}"))
        .await
        .expect("WebSocket connect failed");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("send failed");
}

pub async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(Message::Text(text.to_string()))
        .await
        .expect("send failed");
}

/// Next text frame parsed as JSON, skipping pings, with a timeout.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection ended unexpectedly")
            .expect("transport error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is not valid JSON");
        }
    }
}

/// Read until the server's close frame; returns its close code.
pub async fn recv_close_code(ws: &mut WsClient) -> u16 {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close frame");
        match next {
            Some(Ok(Message::Close(frame))) => {
                return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("transport error before close frame: {e}"),
            None => panic!("connection ended without a close frame"),
        }
    }
}
