use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator for every frame exchanged with clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    System,
    Error,
    Echo,
    LogLine,
    LogsStarted,
    LogsStopped,
    RoomJoined,
    RoomLeft,
    PresenceUpdate,
    RoomList,
    RoomUsers,
    ChatMessage,
    ResumeReviewed,
}

/// Wire envelope for all server-to-client frames.
///
/// Absent fields are omitted on egress; unknown fields on ingress are
/// ignored by serde's default behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Frame {
    /// Empty frame of the given type; fill the rest with struct update syntax.
    pub fn new(message_type: MessageType) -> Self {
        Frame {
            message_type,
            message: None,
            user_id: None,
            username: None,
            room_id: None,
            data: None,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Frame {
            message: Some(message.into()),
            ..Frame::new(MessageType::System)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame {
            message: Some(message.into()),
            ..Frame::new(MessageType::Error)
        }
    }

    pub fn log_line(line: impl Into<String>) -> Self {
        Frame {
            message: Some(line.into()),
            ..Frame::new(MessageType::LogLine)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_type_as_snake_case() {
        let json = serde_json::to_value(Frame::new(MessageType::ResumeReviewed)).unwrap();
        assert_eq!(json["type"], "resume_reviewed");
    }

    #[test]
    fn absent_fields_are_omitted() {
        let json = serde_json::to_value(Frame::error("nope")).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2, "only type and message should be present: {obj:?}");
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "nope");
    }

    #[test]
    fn present_fields_round_trip() {
        let frame = Frame {
            user_id: Some(7),
            username: Some("alice".into()),
            room_id: Some("lobby".into()),
            message: Some("hi".into()),
            ..Frame::new(MessageType::ChatMessage)
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn unknown_ingress_fields_are_ignored() {
        let frame: Frame = serde_json::from_value(json!({
            "type": "system",
            "message": "hello",
            "not_a_field": true,
        }))
        .unwrap();
        assert_eq!(frame.message_type, MessageType::System);
        assert_eq!(frame.message.as_deref(), Some("hello"));
    }
}
