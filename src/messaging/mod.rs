//! Conversations and message persistence
//!
//! Messages are ordered per conversation by a server-assigned sequence
//! number taken from an atomic counter on the conversation document, so
//! ordering survives clock skew between instances. Read state is a pair
//! of per-user maps on the message with read always a subset of
//! delivered.

use bson::{doc, DateTime};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::db::schemas::{
    ConversationDoc, ConversationKind, MessageDoc, NotificationKind, MAX_GROUP_MEMBERS,
};
use crate::db::MongoCollection;
use crate::notify::NotificationDispatcher;
use crate::relay::{MessagePayload, MessageRelay, ServerFrame};
use crate::types::{CaselineError, Result};

/// Upper bound on message body length (characters)
pub const MAX_MESSAGE_LEN: usize = 4_000;

/// Default and maximum history page sizes
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Read-only participant lookup over the conversations collection
///
/// The relay needs participant sets for fan-out but nothing else from
/// messaging, so it gets this thin handle instead of the full service.
#[derive(Clone)]
pub struct ConversationDirectory {
    conversations: MongoCollection<ConversationDoc>,
}

impl ConversationDirectory {
    pub fn new(conversations: MongoCollection<ConversationDoc>) -> Self {
        Self { conversations }
    }

    /// Participant ids of a conversation, None when it does not exist
    pub async fn participants(&self, conversation_id: &str) -> Result<Option<Vec<String>>> {
        Ok(self
            .conversations
            .find_one(doc! { "id": conversation_id })
            .await?
            .map(|c| c.participants))
    }

    pub async fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let count = self
            .conversations
            .count(doc! { "id": conversation_id, "participants": user_id })
            .await?;
        Ok(count > 0)
    }

    /// Distinct users who share at least one conversation with `user_id`
    pub async fn peers_of_user(&self, user_id: &str) -> Result<Vec<String>> {
        let conversations = self
            .conversations
            .find_many(doc! { "participants": user_id }, None, None, None)
            .await?;

        let peers: BTreeSet<String> = conversations
            .into_iter()
            .flat_map(|c| c.peers_of(user_id))
            .collect();
        Ok(peers.into_iter().collect())
    }
}

/// One in-flight send per conversation
///
/// Sequence numbers are claimed atomically, but fan-out must also happen
/// in sequence order: without this, a sender holding seq N+1 could push
/// its frames onto a socket before the sender holding seq N.
struct SendLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SendLocks {
    fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// Conversation and message operations
pub struct MessagingService {
    conversations: MongoCollection<ConversationDoc>,
    messages: MongoCollection<MessageDoc>,
    relay: Arc<MessageRelay>,
    notifier: Arc<NotificationDispatcher>,
    send_locks: SendLocks,
}

impl MessagingService {
    pub fn new(
        conversations: MongoCollection<ConversationDoc>,
        messages: MongoCollection<MessageDoc>,
        relay: Arc<MessageRelay>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            conversations,
            messages,
            relay,
            notifier,
            send_locks: SendLocks::new(),
        }
    }

    /// Create a conversation, or return the existing one for a direct pair
    pub async fn create_conversation(
        &self,
        creator_id: &str,
        kind: ConversationKind,
        participants: Vec<String>,
    ) -> Result<ConversationDoc> {
        let participants = validate_participants(kind, participants, creator_id)?;

        if kind == ConversationKind::Direct {
            // A direct pair has at most one conversation
            let existing = self
                .conversations
                .find_one(doc! {
                    "kind": "direct",
                    "participants": { "$all": participants.clone(), "$size": 2 },
                })
                .await?;
            if let Some(conversation) = existing {
                debug!(id = %conversation.id, "direct conversation already exists");
                return Ok(conversation);
            }
        }

        let conversation =
            ConversationDoc::new(kind, participants, creator_id.to_string());
        self.conversations.insert_one(conversation.clone()).await?;
        info!(id = %conversation.id, ?kind, "conversation created");
        Ok(conversation)
    }

    /// Conversations the user participates in, most recently active first
    pub async fn list_conversations(
        &self,
        user_id: &str,
        include_archived: bool,
    ) -> Result<Vec<ConversationDoc>> {
        let mut filter = doc! { "participants": user_id };
        if !include_archived {
            filter.insert("archived_by", doc! { "$ne": user_id });
        }
        self.conversations
            .find_many(filter, Some(doc! { "last_activity": -1 }), None, None)
            .await
    }

    /// Fetch one conversation the user participates in
    ///
    /// Non-participants get the same NotFound as a missing id, so the
    /// response never reveals whether the conversation exists.
    pub async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationDoc> {
        self.conversations
            .find_one(doc! { "id": conversation_id, "participants": user_id })
            .await?
            .ok_or_else(|| {
                CaselineError::NotFound(format!("conversation {} not found", conversation_id))
            })
    }

    /// Persist a message and fan it out to the other participants
    pub async fn send_message(
        &self,
        sender_id: &str,
        conversation_id: &str,
        content: String,
        attachments: Vec<String>,
    ) -> Result<MessageDoc> {
        validate_content(&content, &attachments)?;
        let conversation = self.get_conversation(sender_id, conversation_id).await?;

        // Held from sequence claim through fan-out so frames enter every
        // socket in the order their messages were persisted
        let send_order = self.send_locks.acquire(conversation_id).await;

        // Claim the next sequence number and bump activity in one atomic
        // step; concurrent senders get distinct, gapless numbers
        let updated = self
            .conversations
            .find_one_and_update(
                doc! { "id": conversation_id },
                doc! {
                    "$inc": { "message_seq": 1_i64 },
                    "$set": { "last_activity": DateTime::now() },
                },
            )
            .await?
            .ok_or_else(|| {
                CaselineError::NotFound(format!("conversation {} not found", conversation_id))
            })?;

        let message = MessageDoc::new(
            conversation_id.to_string(),
            sender_id.to_string(),
            content,
            attachments,
            updated.message_seq,
        );
        self.messages.insert_one(message.clone()).await?;
        debug!(id = %message.id, seq = message.seq, "message persisted");

        // Sending implies the composer stopped typing
        self.relay.typing_stopped(conversation_id, sender_id).await?;

        let frame = ServerFrame::Message(MessagePayload::from(&message));
        self.relay
            .fan_out(conversation_id, Some(sender_id), &frame)
            .await?;
        drop(send_order);

        // The message is persisted and delivered at this point; a failed
        // notification write must not turn the send into an error
        for recipient in conversation.peers_of(sender_id) {
            if let Err(e) = self
                .notifier
                .notify(
                    &recipient,
                    NotificationKind::NewMessage,
                    "conversation",
                    conversation_id,
                    serde_json::json!({
                        "message_id": message.id,
                        "sender_id": sender_id,
                    }),
                )
                .await
            {
                warn!(
                    recipient = recipient.as_str(),
                    conversation_id, "message notification failed: {}", e
                );
            }
        }

        Ok(message)
    }

    /// Message history for a conversation, oldest first
    ///
    /// `before_seq` pages backwards through history.
    pub async fn list_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        before_seq: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<MessageDoc>> {
        self.get_conversation(user_id, conversation_id).await?;

        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        let mut filter = doc! { "conversation_id": conversation_id };
        if let Some(before) = before_seq {
            filter.insert("seq", doc! { "$lt": before });
        }

        let mut messages = self
            .messages
            .find_many(filter, Some(doc! { "seq": -1 }), None, Some(limit))
            .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Mark everything in a conversation delivered and read for a user
    ///
    /// Delivery is set before read so the read-implies-delivered
    /// invariant holds even if the second write is lost.
    pub async fn mark_read(&self, user_id: &str, conversation_id: &str) -> Result<u64> {
        self.get_conversation(user_id, conversation_id).await?;

        let now = DateTime::now();
        let delivered_key = format!("delivered.{}", user_id);
        let read_key = format!("read.{}", user_id);

        self.messages
            .update_many(
                doc! {
                    "conversation_id": conversation_id,
                    &delivered_key: { "$exists": false },
                },
                doc! { "$set": { &delivered_key: now } },
            )
            .await?;

        let result = self
            .messages
            .update_many(
                doc! {
                    "conversation_id": conversation_id,
                    &read_key: { "$exists": false },
                },
                doc! { "$set": { &read_key: now } },
            )
            .await?;

        if result.modified_count > 0 {
            self.relay
                .fan_out(
                    conversation_id,
                    Some(user_id),
                    &ServerFrame::ReadReceipt {
                        conversation_id: conversation_id.to_string(),
                        user_id: user_id.to_string(),
                    },
                )
                .await?;
        }

        Ok(result.modified_count)
    }

    /// Edit a message's body; only the sender may edit
    ///
    /// The first edit snapshots the original body.
    pub async fn edit_message(
        &self,
        user_id: &str,
        message_id: &str,
        content: String,
    ) -> Result<MessageDoc> {
        validate_content(&content, &[])?;

        let message = self
            .messages
            .find_one(doc! { "id": message_id, "sender_id": user_id })
            .await?
            .ok_or_else(|| {
                CaselineError::NotFound(format!("message {} not found", message_id))
            })?;

        let mut set = doc! {
            "content": content.as_str(),
            "edited": true,
            "edited_at": DateTime::now(),
        };
        if !message.edited {
            set.insert("original_content", message.content.as_str());
        }

        let updated = self
            .messages
            .find_one_and_update(doc! { "id": message_id }, doc! { "$set": set })
            .await?
            .ok_or_else(|| {
                CaselineError::NotFound(format!("message {} not found", message_id))
            })?;

        let frame = ServerFrame::Message(MessagePayload::from(&updated));
        self.relay
            .fan_out(&updated.conversation_id, Some(user_id), &frame)
            .await?;

        Ok(updated)
    }

    /// Soft-delete a message; only the sender may delete
    pub async fn delete_message(&self, user_id: &str, message_id: &str) -> Result<()> {
        let result = self
            .messages
            .soft_delete(doc! { "id": message_id, "sender_id": user_id })
            .await?;
        if result.matched_count == 0 {
            return Err(CaselineError::NotFound(format!(
                "message {} not found",
                message_id
            )));
        }
        debug!(message_id, user_id, "message soft-deleted");
        Ok(())
    }

    /// Hide a conversation from the user's default listing
    pub async fn archive(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        self.get_conversation(user_id, conversation_id).await?;
        self.conversations
            .update_one(
                doc! { "id": conversation_id },
                doc! { "$addToSet": { "archived_by": user_id } },
            )
            .await?;
        Ok(())
    }

    /// Bring an archived conversation back into the default listing
    pub async fn unarchive(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        self.get_conversation(user_id, conversation_id).await?;
        self.conversations
            .update_one(
                doc! { "id": conversation_id },
                doc! { "$pull": { "archived_by": user_id } },
            )
            .await?;
        Ok(())
    }
}

/// Validate and normalize a participant list for a new conversation
///
/// Deduplicates, requires the creator to be included, and enforces the
/// size rules for each kind.
fn validate_participants(
    kind: ConversationKind,
    participants: Vec<String>,
    creator_id: &str,
) -> Result<Vec<String>> {
    let distinct: BTreeSet<String> = participants
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect();

    if !distinct.contains(creator_id) {
        return Err(CaselineError::Validation(
            "creator must be a participant".to_string(),
        ));
    }

    match kind {
        ConversationKind::Direct if distinct.len() != 2 => Err(CaselineError::Validation(
            "direct conversations have exactly two participants".to_string(),
        )),
        ConversationKind::Group if distinct.len() < 2 => Err(CaselineError::Validation(
            "group conversations need at least two participants".to_string(),
        )),
        ConversationKind::Group if distinct.len() > MAX_GROUP_MEMBERS => {
            Err(CaselineError::Validation(format!(
                "group conversations are capped at {} participants",
                MAX_GROUP_MEMBERS
            )))
        }
        _ => Ok(distinct.into_iter().collect()),
    }
}

/// Validate a message body
fn validate_content(content: &str, attachments: &[String]) -> Result<()> {
    if content.trim().is_empty() && attachments.is_empty() {
        return Err(CaselineError::Validation(
            "message content must not be empty".to_string(),
        ));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(CaselineError::Validation(format!(
            "message content exceeds {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_requires_exactly_two() {
        let ok = validate_participants(
            ConversationKind::Direct,
            vec!["alice".into(), "bob".into()],
            "alice",
        )
        .unwrap();
        assert_eq!(ok, vec!["alice".to_string(), "bob".to_string()]);

        assert!(validate_participants(
            ConversationKind::Direct,
            vec!["alice".into(), "bob".into(), "carol".into()],
            "alice",
        )
        .is_err());
    }

    #[test]
    fn test_participants_deduplicated() {
        let ok = validate_participants(
            ConversationKind::Direct,
            vec!["alice".into(), "bob".into(), "bob".into()],
            "alice",
        )
        .unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn test_creator_must_participate() {
        assert!(validate_participants(
            ConversationKind::Group,
            vec!["bob".into(), "carol".into()],
            "alice",
        )
        .is_err());
    }

    #[test]
    fn test_group_size_cap() {
        let mut members: Vec<String> = (0..MAX_GROUP_MEMBERS).map(|i| format!("u{}", i)).collect();
        members.push("overflow".into());
        let mut with_creator = members.clone();
        with_creator[0] = "u0".into();
        assert!(
            validate_participants(ConversationKind::Group, with_creator, "u0").is_err()
        );
    }

    #[test]
    fn test_empty_content_needs_attachment() {
        assert!(validate_content("  ", &[]).is_err());
        assert!(validate_content("", &["file.pdf".to_string()]).is_ok());
        assert!(validate_content("hello", &[]).is_ok());
    }

    #[test]
    fn test_content_length_cap() {
        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(validate_content(&long, &[]).is_err());
        let fits = "x".repeat(MAX_MESSAGE_LEN);
        assert!(validate_content(&fits, &[]).is_ok());
    }

    #[tokio::test]
    async fn test_sends_serialized_per_conversation() {
        let locks = Arc::new(SendLocks::new());
        let first = locks.acquire("conv-1").await;

        let contended = Arc::clone(&locks);
        let second = tokio::spawn(async move {
            let _guard = contended.acquire("conv-1").await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(
            !second.is_finished(),
            "second send entered the conversation while the first held it"
        );

        // Other conversations are not blocked
        let _other = locks.acquire("conv-2").await;

        drop(first);
        second.await.unwrap();
    }
}
