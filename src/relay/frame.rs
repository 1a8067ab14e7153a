//! WebSocket wire frames
//!
//! JSON frames tagged by `type`. Clients send `ClientFrame`s, the relay
//! pushes `ServerFrame`s. Timestamps cross the wire as RFC 3339 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_tungstenite::tungstenite::Message;

use crate::db::schemas::{MessageDoc, NotificationDoc};
use crate::types::{CaselineError, Result};

/// Frame received from a connected client
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send a message into a conversation
    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(default)]
        attachments: Vec<String>,
    },
    /// The user is composing in a conversation
    #[serde(rename = "typing_start")]
    Typing { conversation_id: String },
    /// The user stopped composing without sending
    #[serde(rename = "typing_stop")]
    TypingStopped { conversation_id: String },
    /// Mark every message in a conversation read
    MarkRead { conversation_id: String },
    /// Keepalive
    Ping,
}

impl ClientFrame {
    /// Parse an incoming text frame
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| CaselineError::Validation(format!("malformed frame: {}", e)))
    }
}

/// Frame pushed to a connected client
///
/// Deserialize is needed because frames also cross the NATS bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// New message in one of the user's conversations
    #[serde(rename = "new_message")]
    Message(MessagePayload),
    /// A participant started typing
    #[serde(rename = "typing_start")]
    Typing {
        conversation_id: String,
        user_id: String,
    },
    /// A participant stopped typing (explicitly or by timeout)
    #[serde(rename = "typing_stop")]
    TypingStopped {
        conversation_id: String,
        user_id: String,
    },
    /// A known peer went online or offline
    #[serde(rename = "presence_change")]
    Presence { user_id: String, online: bool },
    /// Pushed copy of a persisted notification
    Notification(NotificationPayload),
    /// Read receipts advanced in a conversation
    ReadReceipt {
        conversation_id: String,
        user_id: String,
    },
    /// Acknowledges a client's send with the assigned message id
    Ack {
        conversation_id: String,
        message_id: String,
        seq: i64,
    },
    /// A client frame was rejected
    Error { message: String },
    /// Keepalive reply
    Pong,
}

impl ServerFrame {
    /// Serialize to a WebSocket text message
    pub fn to_message(&self) -> Result<Message> {
        let text = serde_json::to_string(self)?;
        Ok(Message::Text(text.into()))
    }
}

/// Message body as pushed over the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub seq: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
}

impl From<&MessageDoc> for MessagePayload {
    fn from(msg: &MessageDoc) -> Self {
        Self {
            id: msg.id.clone(),
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            attachments: msg.attachments.clone(),
            sent_at: msg.sent_at.to_chrono(),
            seq: msg.seq,
            edited: msg.edited,
        }
    }
}

/// Notification body as pushed over the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub id: String,
    pub kind: String,
    pub source_type: String,
    pub source_id: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl From<&NotificationDoc> for NotificationPayload {
    fn from(n: &NotificationDoc) -> Self {
        Self {
            id: n.id.clone(),
            kind: n.kind.as_str().to_string(),
            source_type: n.source_type.clone(),
            source_id: n.source_id.clone(),
            payload: n.payload.clone(),
            created_at: n.created_at.to_chrono(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message() {
        let frame = ClientFrame::parse(
            r#"{"type":"send_message","conversation_id":"c1","content":"hello"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::SendMessage {
                conversation_id: "c1".into(),
                content: "hello".into(),
                attachments: vec![],
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = ClientFrame::parse(r#"{"type":"teleport","conversation_id":"c1"}"#).unwrap_err();
        assert!(matches!(err, CaselineError::Validation(_)));
    }

    #[test]
    fn test_parse_typing_frames() {
        let start = ClientFrame::parse(r#"{"type":"typing_start","conversation_id":"c1"}"#);
        assert_eq!(
            start.unwrap(),
            ClientFrame::Typing {
                conversation_id: "c1".into()
            }
        );
        let stop = ClientFrame::parse(r#"{"type":"typing_stop","conversation_id":"c1"}"#);
        assert_eq!(
            stop.unwrap(),
            ClientFrame::TypingStopped {
                conversation_id: "c1".into()
            }
        );
    }

    #[test]
    fn test_server_frame_wire_tags() {
        let frame = ServerFrame::Typing {
            conversation_id: "c1".into(),
            user_id: "u1".into(),
        };
        let msg = frame.to_message().unwrap();
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        assert!(text.contains(r#""type":"typing_start""#));

        let presence = ServerFrame::Presence {
            user_id: "u1".into(),
            online: false,
        };
        let Message::Text(text) = presence.to_message().unwrap() else {
            panic!("expected text frame");
        };
        assert!(text.contains(r#""type":"presence_change""#));
    }
}
