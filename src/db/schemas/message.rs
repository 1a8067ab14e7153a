//! Message document schema
//!
//! Messages are immutable once delivered; an edit keeps the original text
//! and records a flag plus timestamp. Delivery and read state are maps
//! from user id to timestamp. Invariant: a user appears in `read` only
//! after appearing in `delivered` (marking read backfills delivery).

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for messages
pub const MESSAGE_COLLECTION: &str = "messages";

/// Message document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable message identifier (UUID); also the client's
    /// de-duplication key for its own transport retries
    pub id: String,

    /// Owning conversation
    pub conversation_id: String,

    /// Sending user
    pub sender_id: String,

    /// Message text
    pub content: String,

    /// Original text, kept when the message is first edited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,

    /// Object-store URLs for attachments
    #[serde(default)]
    pub attachments: Vec<String>,

    /// Edit flag + timestamp; content history is not destroyed
    #[serde(default)]
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime>,

    /// When the message was persisted
    pub sent_at: DateTime,

    /// Position within the conversation (from the conversation's counter)
    pub seq: i64,

    /// user id -> delivery timestamp
    #[serde(default)]
    pub delivered: HashMap<String, DateTime>,

    /// user id -> read timestamp; subset of `delivered` keys
    #[serde(default)]
    pub read: HashMap<String, DateTime>,
}

impl MessageDoc {
    /// Create a new message; the sender has trivially delivered and read it
    pub fn new(
        conversation_id: String,
        sender_id: String,
        content: String,
        attachments: Vec<String>,
        seq: i64,
    ) -> Self {
        let now = DateTime::now();
        let mut delivered = HashMap::new();
        delivered.insert(sender_id.clone(), now);
        let mut read = HashMap::new();
        read.insert(sender_id.clone(), now);

        Self {
            _id: None,
            metadata: Metadata::new(),
            id: Uuid::new_v4().to_string(),
            conversation_id,
            sender_id,
            content,
            original_content: None,
            attachments,
            edited: false,
            edited_at: None,
            sent_at: now,
            seq,
            delivered,
            read,
        }
    }

    /// Whether the read-state invariant holds (read keys ⊆ delivered keys)
    pub fn read_state_consistent(&self) -> bool {
        self.read.keys().all(|u| self.delivered.contains_key(u))
    }
}

impl IntoIndexes for MessageDoc {
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
            // History listing in persisted order
            (doc! { "conversation_id": 1, "seq": 1 }, None),
        ]
    }
}

impl MutMetadata for MessageDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_starts_delivered_and_read() {
        let msg = MessageDoc::new("conv-1".into(), "alice".into(), "hello".into(), vec![], 1);

        assert!(msg.delivered.contains_key("alice"));
        assert!(msg.read.contains_key("alice"));
        assert!(msg.read_state_consistent());
    }

    #[test]
    fn test_read_without_delivered_is_inconsistent() {
        let mut msg = MessageDoc::new("conv-1".into(), "alice".into(), "hi".into(), vec![], 1);
        msg.read.insert("bob".into(), DateTime::now());

        assert!(!msg.read_state_consistent());

        msg.delivered.insert("bob".into(), DateTime::now());
        assert!(msg.read_state_consistent());
    }
}
