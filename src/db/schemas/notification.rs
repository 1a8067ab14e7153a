//! Notification document schema
//!
//! The persisted row is authoritative; real-time push is an optimization
//! layered on top. Expiry is soft (TTL field checked in queries) until the
//! cleanup sweep retires the row.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for notifications
pub const NOTIFICATION_COLLECTION: &str = "notifications";

/// Platform events that produce notifications
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A reply landed on the recipient's forum post
    Reply,
    /// An admin approved the recipient's use-case submission
    Approval,
    /// A message arrived in one of the recipient's conversations
    NewMessage,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Approval => "approval",
            Self::NewMessage => "new_message",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reply" => Ok(Self::Reply),
            "approval" => Ok(Self::Approval),
            "new_message" => Ok(Self::NewMessage),
            other => Err(format!("unknown notification kind: {}", other)),
        }
    }
}

/// Notification document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable notification identifier (UUID)
    pub id: String,

    /// Recipient user
    pub recipient_id: String,

    /// Event category
    pub kind: NotificationKind,

    /// Source entity reference (post, message, use case) by type + id
    pub source_type: String,
    pub source_id: String,

    /// Event payload pushed to the client as-is
    #[serde(default)]
    pub payload: JsonValue,

    /// Read flag
    #[serde(default)]
    pub read: bool,

    /// When the notification was created
    pub created_at: DateTime,

    /// Excluded from default listings past this point; soft-deleted
    /// by the cleanup sweep
    pub expires_at: DateTime,
}

impl Default for NotificationDoc {
    fn default() -> Self {
        let now = DateTime::now();
        Self {
            _id: None,
            metadata: Metadata::default(),
            id: String::new(),
            recipient_id: String::new(),
            kind: NotificationKind::Reply,
            source_type: String::new(),
            source_id: String::new(),
            payload: JsonValue::Null,
            read: false,
            created_at: now,
            expires_at: now,
        }
    }
}

impl NotificationDoc {
    /// Create a new unread notification with the given TTL
    pub fn new(
        recipient_id: String,
        kind: NotificationKind,
        source_type: String,
        source_id: String,
        payload: JsonValue,
        ttl_hours: u64,
    ) -> Self {
        let now = DateTime::now();
        let expires_at =
            DateTime::from_millis(now.timestamp_millis() + (ttl_hours as i64) * 3_600_000);

        Self {
            _id: None,
            metadata: Metadata::new(),
            id: Uuid::new_v4().to_string(),
            recipient_id,
            kind,
            source_type,
            source_id,
            payload,
            read: false,
            created_at: now,
            expires_at,
        }
    }
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("id_unique".to_string())
                        .build(),
                ),
            ),
            // Per-recipient listing, newest first, plus unread count
            (doc! { "recipient_id": 1, "read": 1, "created_at": -1 }, None),
            // Expiry sweep
            (doc! { "expires_at": 1 }, None),
        ]
    }
}

impl MutMetadata for NotificationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            NotificationKind::Reply,
            NotificationKind::Approval,
            NotificationKind::NewMessage,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("likes".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn test_expiry_is_in_the_future() {
        let n = NotificationDoc::new(
            "u1".into(),
            NotificationKind::NewMessage,
            "message".into(),
            "m1".into(),
            serde_json::json!({}),
            24,
        );
        assert!(n.expires_at.timestamp_millis() > n.created_at.timestamp_millis());
        assert!(!n.read);
    }
}
