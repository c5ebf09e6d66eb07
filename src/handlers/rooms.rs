use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{ServiceHandler, ServiceKind};
use crate::error::{AppError, AppResult};
use crate::events::Event;
use crate::message::{Frame, MessageType};
use crate::registry::{Connection, ConnectionRegistry};

const AVAILABLE_COMMANDS: &str =
    "Unknown room command. Available commands: join_room, leave_room, chat_message, list_rooms, get_room_users";

/// Presence and chat share room membership, so one handler covers both.
///
/// `rooms` and `user_rooms` are symmetric indices over the same membership
/// relation; they are held in one struct and always updated under the same
/// write lock.
pub struct RoomHandler {
    registry: ConnectionRegistry,
    state: RwLock<RoomState>,
}

#[derive(Default)]
struct RoomState {
    rooms: HashMap<String, HashSet<(u64, String)>>,
    user_rooms: HashMap<u64, HashSet<String>>,
}

impl RoomHandler {
    pub fn new(registry: ConnectionRegistry) -> Self {
        RoomHandler {
            registry,
            state: RwLock::new(RoomState::default()),
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn join_room(&self, conn: &Connection, room_id: &str) {
        let user_id = conn.user_id();
        let username = conn.username().to_string();

        let members = {
            let mut state = self.state.write().await;
            state
                .rooms
                .entry(room_id.to_string())
                .or_default()
                .insert((user_id, username.clone()));
            state
                .user_rooms
                .entry(user_id)
                .or_default()
                .insert(room_id.to_string());
            snapshot_members(&state, room_id)
        };

        conn.send(&Frame {
            room_id: Some(room_id.to_string()),
            message: Some(format!("Joined room {room_id}")),
            ..Frame::new(MessageType::RoomJoined)
        });

        let notice = Frame {
            room_id: Some(room_id.to_string()),
            username: Some("System".to_string()),
            message: Some(format!("{username} has joined the room")),
            ..Frame::new(MessageType::ChatMessage)
        };
        self.broadcast(&members, &notice, Some(user_id)).await;
        self.broadcast_presence(room_id, &members).await;

        tracing::info!(user_id, username = %username, room_id, "User joined room");
    }

    async fn leave_room(&self, user_id: u64, username: &str, room_id: &str) {
        let remaining = {
            let mut state = self.state.write().await;
            let Some(members) = state.rooms.get_mut(room_id) else {
                return;
            };
            if !members.remove(&(user_id, username.to_string())) {
                return;
            }
            if let Some(joined) = state.user_rooms.get_mut(&user_id) {
                joined.remove(room_id);
                if joined.is_empty() {
                    state.user_rooms.remove(&user_id);
                }
            }
            if state.rooms.get(room_id).is_some_and(|m| m.is_empty()) {
                state.rooms.remove(room_id);
                None
            } else {
                Some(snapshot_members(&state, room_id))
            }
        };

        if let Some(members) = remaining {
            self.broadcast_presence(room_id, &members).await;
            let notice = Frame {
                room_id: Some(room_id.to_string()),
                username: Some("System".to_string()),
                message: Some(format!("{username} has left the room")),
                ..Frame::new(MessageType::ChatMessage)
            };
            self.broadcast(&members, &notice, None).await;
        }

        // Through the registry: on the disconnect path the socket is already
        // gone and this send quietly misses.
        self.registry
            .send_to_user(
                ServiceKind::Room,
                user_id,
                &Frame {
                    room_id: Some(room_id.to_string()),
                    message: Some(format!("Left room {room_id}")),
                    ..Frame::new(MessageType::RoomLeft)
                },
            )
            .await;

        tracing::info!(user_id, username, room_id, "User left room");
    }

    async fn chat_message(&self, conn: &Connection, room_id: &str, content: &str) -> AppResult<()> {
        // Whitespace-only content is dropped without a reply.
        if content.trim().is_empty() {
            return Ok(());
        }

        let user_id = conn.user_id();
        let members = {
            let state = self.state.read().await;
            match state.rooms.get(room_id) {
                Some(members) if members.iter().any(|(id, _)| *id == user_id) => {
                    snapshot_members(&state, room_id)
                }
                _ => {
                    return Err(AppError::Semantic(format!(
                        "You are not in chat room {room_id}"
                    )));
                }
            }
        };

        let frame = Frame {
            room_id: Some(room_id.to_string()),
            user_id: Some(user_id),
            username: Some(conn.username().to_string()),
            message: Some(content.to_string()),
            ..Frame::new(MessageType::ChatMessage)
        };
        self.broadcast(&members, &frame, None).await;
        tracing::debug!(user_id, room_id, "Chat message broadcast");
        Ok(())
    }

    async fn list_rooms(&self, conn: &Connection) {
        let rooms: Vec<Value> = {
            let state = self.state.read().await;
            state
                .rooms
                .iter()
                .map(|(id, members)| json!({"id": id, "user_count": members.len()}))
                .collect()
        };
        conn.send(&Frame {
            data: Some(json!({ "rooms": rooms })),
            ..Frame::new(MessageType::RoomList)
        });
    }

    async fn get_room_users(&self, conn: &Connection, room_id: &str) -> AppResult<()> {
        let members = {
            let state = self.state.read().await;
            state.rooms.get(room_id).map(|_| snapshot_members(&state, room_id))
        };
        let Some(members) = members else {
            return Err(AppError::Semantic(format!("Room {room_id} does not exist")));
        };
        conn.send(&Frame {
            data: Some(json!({
                "room_id": room_id,
                "users": users_json(&members),
            })),
            ..Frame::new(MessageType::RoomUsers)
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------------

    /// Deliver a frame to every member, optionally excluding one user.
    /// Per-socket failures are isolated: the registry evicts the dead entry
    /// and the remaining sends proceed.
    async fn broadcast(&self, members: &[(u64, String)], frame: &Frame, exclude: Option<u64>) {
        for (user_id, _) in members {
            if Some(*user_id) == exclude {
                continue;
            }
            self.registry
                .send_to_user(ServiceKind::Room, *user_id, frame)
                .await;
        }
    }

    async fn broadcast_presence(&self, room_id: &str, members: &[(u64, String)]) {
        let frame = Frame {
            room_id: Some(room_id.to_string()),
            data: Some(json!({
                "user_count": members.len(),
                "users": users_json(members),
            })),
            ..Frame::new(MessageType::PresenceUpdate)
        };
        self.broadcast(members, &frame, None).await;
    }
}

fn snapshot_members(state: &RoomState, room_id: &str) -> Vec<(u64, String)> {
    state
        .rooms
        .get(room_id)
        .map(|members| members.iter().cloned().collect())
        .unwrap_or_default()
}

fn users_json(members: &[(u64, String)]) -> Vec<Value> {
    members
        .iter()
        .map(|(id, username)| json!({"id": id, "username": username}))
        .collect()
}

// ============================================================================
// Handler contract
// ============================================================================

#[async_trait]
impl ServiceHandler for RoomHandler {
    async fn handle_connect(&self, event: Event) -> AppResult<()> {
        let conn = event
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("connect event without a connection".into()))?;
        conn.send(&Frame::system(format!(
            "Room service: Connected as {}",
            event.username
        )));
        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Room service: user connected"
        );
        Ok(())
    }

    async fn handle_message(&self, event: Event) -> AppResult<()> {
        let conn = event
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("message event without a connection".into()))?;
        let data = event.data.as_ref();
        let command = data.and_then(|d| d.get("type")).and_then(Value::as_str);
        let room_id = data.and_then(|d| d.get("room_id")).and_then(Value::as_str);
        let content = data.and_then(|d| d.get("content")).and_then(Value::as_str);

        match (command, room_id, content) {
            (Some("join_room"), Some(room), _) => {
                self.join_room(conn, room).await;
                Ok(())
            }
            (Some("leave_room"), Some(room), _) => {
                self.leave_room(event.user_id, &event.username, room).await;
                Ok(())
            }
            (Some("chat_message"), Some(room), Some(content)) => {
                self.chat_message(conn, room, content).await
            }
            (Some("list_rooms"), _, _) => {
                self.list_rooms(conn).await;
                Ok(())
            }
            (Some("get_room_users"), Some(room), _) => self.get_room_users(conn, room).await,
            _ => Err(AppError::Semantic(AVAILABLE_COMMANDS.to_string())),
        }
    }

    async fn handle_disconnect(&self, event: Event) -> AppResult<()> {
        let joined: Vec<String> = {
            let state = self.state.read().await;
            state
                .user_rooms
                .get(&event.user_id)
                .map(|rooms| rooms.iter().cloned().collect())
                .unwrap_or_default()
        };
        for room_id in joined {
            self.leave_room(event.user_id, &event.username, &room_id).await;
        }
        self.state.write().await.user_rooms.remove(&event.user_id);

        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Room service: user disconnected"
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
