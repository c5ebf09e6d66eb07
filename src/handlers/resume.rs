use async_trait::async_trait;

use super::ServiceHandler;
use crate::error::{AppError, AppResult};
use crate::events::Event;
use crate::message::Frame;

/// Receiver-only service: review results arrive through the AMQP bridge, so
/// client frames are ignored.
pub struct ResumeHandler;

impl ResumeHandler {
    pub fn new() -> Self {
        ResumeHandler
    }
}

impl Default for ResumeHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceHandler for ResumeHandler {
    async fn handle_connect(&self, event: Event) -> AppResult<()> {
        let conn = event
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("connect event without a connection".into()))?;
        conn.send(&Frame::system(format!(
            "Resume service: Connected as {}",
            event.username
        )));
        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Resume service: user connected"
        );
        Ok(())
    }

    async fn handle_message(&self, event: Event) -> AppResult<()> {
        tracing::debug!(
            user_id = event.user_id,
            "Resume service ignores client frames"
        );
        Ok(())
    }

    async fn handle_disconnect(&self, event: Event) -> AppResult<()> {
        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Resume service: user disconnected"
        );
        Ok(())
    }
}
