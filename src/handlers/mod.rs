pub mod echo;
pub mod logs;
pub mod resume;
pub mod rooms;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::events::{Event, EventEmitter, EventType};
use crate::message::Frame;
use crate::runtime::ContainerLogSource;
use crate::state::AppState;

// ============================================================================
// Service kinds
// ============================================================================

/// Which logical service endpoint a connection belongs to. Determines the
/// emitter and handler set that receives the connection's events, and keys
/// the connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Echo,
    Logs,
    Room,
    Resume,
}

impl ServiceKind {
    /// Map a `/ws/<service>/<token>` path segment to a kind. The presence
    /// and chat endpoints share room state, so both land on `Room`.
    pub fn from_path(service: &str) -> Option<Self> {
        match service {
            "echo" => Some(ServiceKind::Echo),
            "logs" => Some(ServiceKind::Logs),
            "resume" => Some(ServiceKind::Resume),
            "presence" | "chat" => Some(ServiceKind::Room),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Echo => "echo",
            ServiceKind::Logs => "logs",
            ServiceKind::Room => "room",
            ServiceKind::Resume => "resume",
        }
    }
}

// ============================================================================
// Handler contract
// ============================================================================

/// The three entry points every service handler exposes. Handlers convert
/// their own failures into error frames; only unexpected internal failures
/// bubble out, to be logged by the emitter.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn handle_connect(&self, event: Event) -> AppResult<()>;
    async fn handle_message(&self, event: Event) -> AppResult<()>;
    async fn handle_disconnect(&self, event: Event) -> AppResult<()>;
}

/// Convert a handler failure into its error frame for the client.
///
/// Auth, protocol, semantic, and resource failures end here: frame sent,
/// connection kept, nothing left to log at error level. Internal failures
/// get the generic frame and keep propagating so the emitter records them.
fn surface_error(event: &Event, result: AppResult<()>) -> AppResult<()> {
    let Err(err) = result else {
        return Ok(());
    };
    if let Some(conn) = event.conn.as_ref() {
        conn.send(&Frame::from(&err));
    }
    match err {
        AppError::Internal(_) => Err(err),
        _ => {
            tracing::debug!(
                user_id = event.user_id,
                error = %err,
                "Handler rejected a command"
            );
            Ok(())
        }
    }
}

/// Subscribe a handler's three entry points on its service's emitter.
/// Performed once at startup; the emitter holds the resulting closures,
/// not the handler's identity.
pub async fn subscribe(emitter: &EventEmitter, handler: Arc<dyn ServiceHandler>) {
    let h = handler.clone();
    emitter
        .on(EventType::Connect, move |event| -> BoxFuture<'static, AppResult<()>> {
            let h = h.clone();
            Box::pin(async move {
                let result = h.handle_connect(event.clone()).await;
                surface_error(&event, result)
            })
        })
        .await;

    let h = handler.clone();
    emitter
        .on(EventType::Message, move |event| -> BoxFuture<'static, AppResult<()>> {
            let h = h.clone();
            Box::pin(async move {
                let result = h.handle_message(event.clone()).await;
                surface_error(&event, result)
            })
        })
        .await;

    let h = handler;
    emitter
        .on(EventType::Disconnect, move |event| -> BoxFuture<'static, AppResult<()>> {
            let h = h.clone();
            Box::pin(async move {
                let result = h.handle_disconnect(event.clone()).await;
                surface_error(&event, result)
            })
        })
        .await;
}

/// Construct every service handler and subscribe it on its emitter.
pub async fn register_all(state: &AppState, log_source: Arc<dyn ContainerLogSource>) {
    subscribe(
        state.emitters.of(ServiceKind::Echo),
        Arc::new(echo::EchoHandler::new()),
    )
    .await;
    subscribe(
        state.emitters.of(ServiceKind::Room),
        Arc::new(rooms::RoomHandler::new(state.registry.clone())),
    )
    .await;
    subscribe(
        state.emitters.of(ServiceKind::Logs),
        Arc::new(logs::LogStreamHandler::new(log_source)),
    )
    .await;
    subscribe(
        state.emitters.of(ServiceKind::Resume),
        Arc::new(resume::ResumeHandler::new()),
    )
    .await;
}

// ============================================================================
// HTTP surface
// ============================================================================

pub async fn root_status() -> Json<Value> {
    Json(json!({
        "status": "online",
        "message": "WebSocket server is running",
    }))
}

pub async fn ping() -> &'static str {
    "pong"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::message::MessageType;
    use crate::registry::ConnectionRegistry;
    use tokio::sync::mpsc;

    async fn event_with_connection() -> (Event, mpsc::UnboundedReceiver<String>) {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry
            .register(ServiceKind::Echo, &Claims::new(1, "alice", vec![], 15), tx)
            .await
            .unwrap();
        (Event::connect(ServiceKind::Echo, &conn), rx)
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Frame {
        serde_json::from_str(&rx.try_recv().expect("expected a frame")).unwrap()
    }

    #[tokio::test]
    async fn rejected_command_becomes_an_error_frame_and_is_absorbed() {
        let (event, mut rx) = event_with_connection().await;

        let result = surface_error(
            &event,
            Err(AppError::Semantic("Room ghost does not exist".into())),
        );

        assert!(result.is_ok(), "surfaced failures must not reach the emitter");
        let frame = next_frame(&mut rx);
        assert_eq!(frame.message_type, MessageType::Error);
        assert_eq!(frame.message.as_deref(), Some("Room ghost does not exist"));
    }

    #[tokio::test]
    async fn internal_failure_sends_generic_frame_and_propagates() {
        let (event, mut rx) = event_with_connection().await;

        let result = surface_error(
            &event,
            Err(AppError::Internal("message event without a connection".into())),
        );

        assert!(matches!(result, Err(AppError::Internal(_))));
        let frame = next_frame(&mut rx);
        assert_eq!(frame.message.as_deref(), Some("Error processing your message"));
    }

    #[tokio::test]
    async fn success_passes_through_without_frames() {
        let (event, mut rx) = event_with_connection().await;
        assert!(surface_error(&event, Ok(())).is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn from_path_routes_presence_and_chat_to_room() {
        assert_eq!(ServiceKind::from_path("presence"), Some(ServiceKind::Room));
        assert_eq!(ServiceKind::from_path("chat"), Some(ServiceKind::Room));
        assert_eq!(ServiceKind::from_path("echo"), Some(ServiceKind::Echo));
        assert_eq!(ServiceKind::from_path("logs"), Some(ServiceKind::Logs));
        assert_eq!(ServiceKind::from_path("resume"), Some(ServiceKind::Resume));
        assert_eq!(ServiceKind::from_path("ghost"), None);
    }
}
