use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::auth::{self, Claims};
use crate::error::AppError;
use crate::events::Event;
use crate::handlers::ServiceKind;
use crate::message::Frame;
use crate::state::AppState;

/// Policy violation: auth/authorization failures and duplicate connections.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Application-defined close code for unknown-service upgrades.
const CLOSE_UNKNOWN_SERVICE: u16 = 4004;

const LOGS_GROUPS: &[&str] = &["is_admin", "is_api_key"];

// ============================================================================
// Upgrade handler
// ============================================================================

/// GET /ws/:service/:token — authenticate and attach to a service.
///
/// The token rides the path because WebSocket upgrades are plain GET
/// requests and cannot carry an Authorization header reliably across all
/// client environments. Failures close the accepted socket with 1008 (or
/// 4004 for an unknown service) rather than rejecting the upgrade, so
/// clients always see a proper close code.
pub async fn websocket_endpoint(
    ws: WebSocketUpgrade,
    Path((service, token)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let claims = match auth::verify_token(&token, &state.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(service = %service, error = %e, "WebSocket authentication failed");
            return ws.on_upgrade(|socket| close_policy_violation(socket, "invalid token"));
        }
    };

    let Some(kind) = ServiceKind::from_path(&service) else {
        tracing::warn!(service = %service, "Unknown service requested");
        return ws.on_upgrade(move |socket| reject_unknown_service(socket, service));
    };

    // Log streaming is admin-only; reject at admission before any state is
    // touched. The log handler re-checks per command.
    if kind == ServiceKind::Logs && !claims.has_any_group(LOGS_GROUPS) {
        tracing::warn!(user_id = claims.user_id, "Insufficient groups for log streaming");
        return ws.on_upgrade(|socket| close_policy_violation(socket, "insufficient permissions"));
    }

    ws.on_upgrade(move |socket| handle_socket(socket, kind, claims, state))
}

async fn reject_unknown_service(mut socket: WebSocket, service: String) {
    let err = AppError::Semantic(format!(
        "Unknown service: {service}. Available services: echo, presence, chat, logs, resume"
    ));
    if let Ok(json) = serde_json::to_string(&Frame::from(&err)) {
        let _ = socket.send(Message::Text(json)).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNKNOWN_SERVICE,
            reason: "unknown service".into(),
        })))
        .await;
}

async fn close_policy_violation(mut socket: WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: reason.into(),
        })))
        .await;
}

// ============================================================================
// Connection lifecycle
// ============================================================================

async fn handle_socket(socket: WebSocket, kind: ServiceKind, claims: Claims, state: AppState) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let conn = match state.registry.register(kind, &claims, tx).await {
        Ok(conn) => conn,
        Err(_) => {
            // The existing connection stays; only the new socket is closed.
            close_policy_violation(socket, "already connected").await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward outbound frames queued by handlers and the bridge onto the
    // socket. Every send awaits the previous one, so frames leave in the
    // order they were issued.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let emitter = state.emitters.of(kind).clone();
    emitter.emit(Event::connect(kind, &conn)).await;

    // Inbound frames are processed one at a time: the next receive only
    // happens after the previous emit completed.
    let recv_conn = conn.clone();
    let recv_registry = state.registry.clone();
    let recv_emitter = emitter.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => {
                        recv_emitter
                            .emit(Event::message(kind, &recv_conn, value))
                            .await;
                    }
                    Err(_) => {
                        if !recv_registry.is_closing(recv_conn.id()).await {
                            let err =
                                AppError::Protocol("Invalid JSON message format".to_string());
                            recv_conn.send(&Frame::from(&err));
                        }
                    }
                },
                Ok(Message::Close(_)) => break,
                // Axum answers Ping frames transparently; binary input is
                // not part of the protocol.
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(
                        user_id = recv_conn.user_id(),
                        error = ?e,
                        "WebSocket receive error; closing connection"
                    );
                    break;
                }
            }
        }
    });

    // Whichever task finishes first tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.disconnect(kind, claims.user_id).await;
    emitter.emit(Event::disconnect(kind, &conn)).await;
    tracing::info!(
        user_id = claims.user_id,
        username = %claims.username,
        service = kind.as_str(),
        "Client disconnected"
    );
}
