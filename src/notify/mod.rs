//! Notification persistence and push
//!
//! Persist-first: a notification is written to MongoDB before any push is
//! attempted, so delivery failures never lose it. The push over the relay
//! is best-effort and a failure only logs. Expired notifications are
//! soft-deleted by a periodic sweep; reads also filter on expiry so a
//! not-yet-swept record never surfaces.

use bson::{doc, DateTime, Document};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::schemas::{NotificationDoc, NotificationKind};
use crate::db::MongoCollection;
use crate::relay::{MessageRelay, NotificationPayload, ServerFrame};
use crate::types::Result;

/// Default page size for notification listings
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Persists notifications and pushes them over the relay
pub struct NotificationDispatcher {
    notifications: MongoCollection<NotificationDoc>,
    relay: Arc<MessageRelay>,
    ttl_hours: u64,
}

impl NotificationDispatcher {
    pub fn new(
        notifications: MongoCollection<NotificationDoc>,
        relay: Arc<MessageRelay>,
        ttl_hours: u64,
    ) -> Self {
        Self {
            notifications,
            relay,
            ttl_hours,
        }
    }

    /// Persist a notification, then push it to the recipient
    ///
    /// The persisted record is the source of truth; an offline recipient
    /// or a push failure leaves it waiting in their feed.
    pub async fn notify(
        &self,
        recipient_id: &str,
        kind: NotificationKind,
        source_type: &str,
        source_id: &str,
        payload: JsonValue,
    ) -> Result<NotificationDoc> {
        let notification = NotificationDoc::new(
            recipient_id.to_string(),
            kind,
            source_type.to_string(),
            source_id.to_string(),
            payload,
            self.ttl_hours,
        );
        self.notifications.insert_one(notification.clone()).await?;
        debug!(id = %notification.id, recipient_id, kind = kind.as_str(), "notification persisted");

        let frame = ServerFrame::Notification(NotificationPayload::from(&notification));
        if let Err(e) = self.relay.deliver(recipient_id, &frame).await {
            warn!(recipient_id, "notification push failed: {}", e);
        }

        Ok(notification)
    }

    /// A user's notifications, newest first, expired ones excluded
    pub async fn list(
        &self,
        recipient_id: &str,
        unread_only: bool,
        kind: Option<NotificationKind>,
        limit: Option<i64>,
    ) -> Result<Vec<NotificationDoc>> {
        let mut filter = unexpired_filter(recipient_id);
        if unread_only {
            filter.insert("read", false);
        }
        if let Some(kind) = kind {
            filter.insert("kind", kind.as_str());
        }
        self.notifications
            .find_many(
                filter,
                Some(doc! { "created_at": -1 }),
                None,
                Some(limit.unwrap_or(DEFAULT_LIST_LIMIT)),
            )
            .await
    }

    /// Count of unread, unexpired notifications
    pub async fn unread_count(&self, recipient_id: &str) -> Result<u64> {
        let mut filter = unexpired_filter(recipient_id);
        filter.insert("read", false);
        self.notifications.count(filter).await
    }

    /// Mark one notification read; false when it is not the user's
    pub async fn mark_read(&self, recipient_id: &str, notification_id: &str) -> Result<bool> {
        let result = self
            .notifications
            .update_one(
                doc! { "id": notification_id, "recipient_id": recipient_id },
                doc! { "$set": { "read": true } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    /// Mark everything read for a user, returning how many flipped
    pub async fn mark_all_read(&self, recipient_id: &str) -> Result<u64> {
        let result = self
            .notifications
            .update_many(
                doc! { "recipient_id": recipient_id, "read": false },
                doc! { "$set": { "read": true } },
            )
            .await?;
        Ok(result.modified_count)
    }

    /// Soft-delete every expired notification still marked live
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = self
            .notifications
            .update_many(
                doc! {
                    "expires_at": { "$lte": DateTime::now() },
                    "metadata.is_deleted": { "$ne": true },
                },
                doc! {
                    "$set": {
                        "metadata.is_deleted": true,
                        "metadata.deleted_at": DateTime::now(),
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;

        if result.modified_count > 0 {
            info!(swept = result.modified_count, "expired notifications swept");
        }
        Ok(result.modified_count)
    }
}

/// Filter for a recipient's live notifications
fn unexpired_filter(recipient_id: &str) -> Document {
    doc! {
        "recipient_id": recipient_id,
        "expires_at": { "$gt": DateTime::now() },
    }
}

/// Periodically remove expired notifications
pub fn spawn_expiry_sweep(dispatcher: Arc<NotificationDispatcher>, period: Duration) {
    tokio::spawn(async move {
        info!("Notification expiry sweep started (every {:?})", period);
        let mut interval = tokio::time::interval(period);
        // The immediate first tick clears any backlog from downtime
        loop {
            interval.tick().await;
            if let Err(e) = dispatcher.sweep_expired().await {
                warn!("notification expiry sweep failed: {}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpired_filter_scopes_to_recipient() {
        let filter = unexpired_filter("alice");
        assert_eq!(filter.get_str("recipient_id").unwrap(), "alice");
        assert!(filter
            .get_document("expires_at")
            .unwrap()
            .contains_key("$gt"));
    }
}
