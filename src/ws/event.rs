//! Control messages exchanged over the websocket.
//!
//! Every frame on the wire is an [`Envelope`]. Inbound envelopes are decoded
//! once into [`ClientEvent`]; outbound events are built as [`ServerEvent`] and
//! encoded once per broadcast.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::db::{ChatMessage, RoomId};
use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Subscribe { room_id: RoomId },
    Unsubscribe { room_id: RoomId },
    Ping,
}

#[derive(Debug)]
pub enum DecodeError {
    /// Not an envelope, or an envelope missing what its type requires.
    Malformed(String),
    /// Well-formed envelope whose type the server does not handle.
    UnknownType(String),
}

impl From<DecodeError> for ChatError {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::Malformed(reason) => ChatError::Malformed(reason),
            DecodeError::UnknownType(kind) => ChatError::Malformed(format!("unknown message type {kind}")),
        }
    }
}

impl ClientEvent {
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope =
            serde_json::from_slice(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        match envelope.kind.as_str() {
            "subscribe" => room_of(&envelope).map(|room_id| ClientEvent::Subscribe { room_id }),
            "unsubscribe" => room_of(&envelope).map(|room_id| ClientEvent::Unsubscribe { room_id }),
            "ping" => Ok(ClientEvent::Ping),
            _ => Err(DecodeError::UnknownType(envelope.kind)),
        }
    }
}

/// The room is carried in `content`; `room_id` is accepted as a fallback.
fn room_of(envelope: &Envelope) -> Result<RoomId, DecodeError> {
    let room_id = match &envelope.content {
        Value::String(room_id) => Some(room_id.clone()),
        _ => envelope.room_id.clone(),
    };
    room_id
        .filter(|r| !r.is_empty())
        .ok_or_else(|| DecodeError::Malformed(format!("{} without a room id", envelope.kind)))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewMessage(ChatMessage),
    Subscribed { room_id: RoomId },
    Unsubscribed { room_id: RoomId },
    Pong { at: OffsetDateTime },
    Error { message: String },
}

impl ServerEvent {
    pub fn pong_now() -> Self {
        ServerEvent::Pong {
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        use ServerEvent::*;
        match self {
            NewMessage(_) => "new_message",
            Subscribed { .. } => "subscribed",
            Unsubscribed { .. } => "unsubscribed",
            Pong { .. } => "pong",
            Error { .. } => "error",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let kind = self.kind().to_owned();
        match self {
            ServerEvent::NewMessage(message) => Envelope {
                kind,
                room_id: Some(message.room_id.clone()),
                content: serde_json::to_value(message).unwrap_or(Value::Null),
                user_id: Some(message.user_id.clone()),
            },
            ServerEvent::Subscribed { room_id } | ServerEvent::Unsubscribed { room_id } => Envelope {
                kind,
                room_id: Some(room_id.clone()),
                content: json!({ "room_id": room_id, "status": "success" }),
                user_id: None,
            },
            ServerEvent::Pong { at } => Envelope {
                kind,
                room_id: None,
                content: json!({ "timestamp": at.format(&Rfc3339).unwrap_or_default() }),
                user_id: None,
            },
            ServerEvent::Error { message } => Envelope {
                kind,
                room_id: None,
                content: json!({ "message": message }),
                user_id: None,
            },
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_envelope())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn decodes_control_messages() {
        assert_eq!(
            ClientEvent::decode(br#"{"type":"subscribe","content":"r1"}"#).unwrap(),
            ClientEvent::Subscribe { room_id: "r1".to_owned() }
        );
        assert_eq!(
            ClientEvent::decode(br#"{"type":"unsubscribe","content":"r1"}"#).unwrap(),
            ClientEvent::Unsubscribe { room_id: "r1".to_owned() }
        );
        assert_eq!(ClientEvent::decode(br#"{"type":"ping"}"#).unwrap(), ClientEvent::Ping);
    }

    #[test]
    fn room_id_field_is_a_fallback() {
        assert_eq!(
            ClientEvent::decode(br#"{"type":"subscribe","room_id":"r2"}"#).unwrap(),
            ClientEvent::Subscribe { room_id: "r2".to_owned() }
        );
    }

    #[test]
    fn unknown_type_is_distinguished_from_garbage() {
        assert!(matches!(
            ClientEvent::decode(br#"{"type":"dance"}"#),
            Err(DecodeError::UnknownType(kind)) if kind == "dance"
        ));
        assert!(matches!(ClientEvent::decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(ClientEvent::decode(br#"{"content":"r1"}"#), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            ClientEvent::decode(br#"{"type":"subscribe","content":{"room":"r1"}}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn decode_failures_become_malformed() {
        let error = ChatError::from(ClientEvent::decode(br#"{"type":"dance"}"#).unwrap_err());
        assert!(matches!(&error, ChatError::Malformed(reason) if reason.contains("dance")));
        assert!(!error.is_fatal_to_connection());
    }

    #[test]
    fn encodes_new_message_with_room_and_author() {
        let message = ChatMessage {
            id: Uuid::now_v7(),
            room_id: "r1".to_owned(),
            user_id: "alice".to_owned(),
            content: "hi".to_owned(),
            sent_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json: Value = serde_json::from_str(&ServerEvent::NewMessage(message.clone()).encode().unwrap()).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["room_id"], "r1");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["content"]["id"], message.id.to_string());
        assert_eq!(json["content"]["content"], "hi");
    }

    #[test]
    fn encodes_status_replies() {
        let json: Value = serde_json::from_str(
            &ServerEvent::Subscribed { room_id: "r1".to_owned() }.encode().unwrap(),
        )
        .unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["content"]["status"], "success");
        assert!(json.get("user_id").is_none());

        let json: Value = serde_json::from_str(&ServerEvent::error("nope").encode().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["content"]["message"], "nope");

        let json: Value = serde_json::from_str(&ServerEvent::pong_now().encode().unwrap()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json["content"]["timestamp"].as_str().unwrap().contains('T'));
    }
}
