use async_trait::async_trait;
use serde_json::Value;

use super::ServiceHandler;
use crate::error::{AppError, AppResult};
use crate::events::Event;
use crate::message::{Frame, MessageType};

/// Trivial service: echoes `data.content` back to the sender. Reference
/// implementation of the handler contract.
pub struct EchoHandler;

impl EchoHandler {
    pub fn new() -> Self {
        EchoHandler
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceHandler for EchoHandler {
    async fn handle_connect(&self, event: Event) -> AppResult<()> {
        let conn = event
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("connect event without a connection".into()))?;
        conn.send(&Frame::system(format!(
            "Echo service: Connected as {}",
            event.username
        )));
        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Echo service: user connected"
        );
        Ok(())
    }

    async fn handle_message(&self, event: Event) -> AppResult<()> {
        let conn = event
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("message event without a connection".into()))?;
        let content = event
            .data
            .as_ref()
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        conn.send(&Frame {
            user_id: Some(event.user_id),
            username: Some(event.username.clone()),
            message: Some(content.to_string()),
            ..Frame::new(MessageType::Echo)
        });
        Ok(())
    }

    async fn handle_disconnect(&self, event: Event) -> AppResult<()> {
        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Echo service: user disconnected"
        );
        Ok(())
    }
}
