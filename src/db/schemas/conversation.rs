//! Conversation document schema
//!
//! A conversation is a set of participants sharing a private message
//! thread. Archiving is per-participant and does not affect the other
//! participants' view. `message_seq` is the per-conversation message
//! counter; incrementing it atomically on send gives messages their
//! persisted order.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for conversations
pub const CONVERSATION_COLLECTION: &str = "conversations";

/// Group conversations are bounded to this many members
pub const MAX_GROUP_MEMBERS: usize = 10;

/// Conversation type
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    #[default]
    Direct,
    Group,
}

/// Conversation document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConversationDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable conversation identifier (UUID)
    pub id: String,

    /// Direct or group
    #[serde(default)]
    pub kind: ConversationKind,

    /// Participant user ids, order preserved from creation
    pub participants: Vec<String>,

    /// User who opened the conversation
    pub created_by: String,

    /// Participants who archived the conversation for themselves
    #[serde(default)]
    pub archived_by: Vec<String>,

    /// Bumped on every message send
    pub last_activity: DateTime,

    /// Per-conversation message counter ($inc'd on send)
    #[serde(default)]
    pub message_seq: i64,
}

impl ConversationDoc {
    /// Create a new conversation
    pub fn new(kind: ConversationKind, participants: Vec<String>, created_by: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            id: Uuid::new_v4().to_string(),
            kind,
            participants,
            created_by,
            archived_by: Vec::new(),
            last_activity: DateTime::now(),
            message_seq: 0,
        }
    }

    /// Whether the given user is a participant
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// Participants other than the given user
    pub fn peers_of(&self, user_id: &str) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.as_str() != user_id)
            .cloned()
            .collect()
    }
}

impl IntoIndexes for ConversationDoc {
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
            // Per-user conversation listing, most recently active first
            (doc! { "participants": 1, "last_activity": -1 }, None),
        ]
    }
}

impl MutMetadata for ConversationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_excludes_self() {
        let conv = ConversationDoc::new(
            ConversationKind::Group,
            vec!["a".into(), "b".into(), "c".into()],
            "a".into(),
        );

        assert!(conv.has_participant("b"));
        assert!(!conv.has_participant("d"));
        assert_eq!(conv.peers_of("a"), vec!["b".to_string(), "c".to_string()]);
    }
}
