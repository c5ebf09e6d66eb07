use serde::Deserialize;
use serde_json::json;

use super::consumer::ConsumerSpec;
use crate::handlers::ServiceKind;
use crate::message::{Frame, MessageType};
use crate::registry::ConnectionRegistry;

pub const RESUME_QUEUE: &str = "sockets.reviewed-resume";
pub const AI_EXCHANGE: &str = "swecc-ai-exchange";
pub const RESUME_ROUTING_KEY: &str = "reviewed";

/// Body published by the review pipeline once a resume has been processed.
#[derive(Debug, Deserialize)]
pub struct ReviewedResume {
    pub feedback: String,
    pub key: String,
}

/// Consumer delivering resume-review results to the owning user's live
/// Resume connection. At-most-once: no connection means the delivery is
/// dropped with a warning, never retried.
pub fn reviewed_resume_consumer(registry: ConnectionRegistry) -> ConsumerSpec {
    ConsumerSpec::json::<ReviewedResume, _, _>(
        "reviewed-resume",
        RESUME_QUEUE,
        AI_EXCHANGE,
        RESUME_ROUTING_KEY,
        true,
        move |body: ReviewedResume| {
            let registry = registry.clone();
            async move { deliver_review(&registry, body).await }
        },
    )
}

async fn deliver_review(registry: &ConnectionRegistry, body: ReviewedResume) {
    let Some((user_id, resume_id, file_name)) = parse_resume_key(&body.key) else {
        tracing::warn!(key = %body.key, "Malformed resume key; dropping delivery");
        return;
    };

    let Some(conn) = registry.lookup(ServiceKind::Resume, user_id).await else {
        tracing::warn!(user_id, "No active resume connection; dropping delivery");
        return;
    };

    let frame = Frame {
        user_id: Some(user_id),
        data: Some(json!({
            "resume_id": resume_id,
            "file_name": file_name,
            "feedback": body.feedback,
        })),
        ..Frame::new(MessageType::ResumeReviewed)
    };
    if !conn.send(&frame) {
        tracing::warn!(user_id, "Failed to deliver resume review; connection gone");
        return;
    }
    tracing::info!(user_id, "Delivered resume review");
}

/// Split `<user_id>-<resume_id>-<file_name>` on the first two `-` only; the
/// file name may itself contain `-`. Both id components must parse as
/// integers (`resume_id` stays a string in the outgoing payload).
fn parse_resume_key(key: &str) -> Option<(u64, String, String)> {
    let mut parts = key.splitn(3, '-');
    let user_id: u64 = parts.next()?.parse().ok()?;
    let resume_id = parts.next()?;
    resume_id.parse::<u64>().ok()?;
    let file_name = parts.next()?;
    Some((user_id, resume_id.to_string(), file_name.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
