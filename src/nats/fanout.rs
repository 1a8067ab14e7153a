//! Cross-instance frame fan-out over NATS
//!
//! Frames for a user are published to `caseline.user.{user_id}`. Every
//! instance, the publisher included, subscribes to the wildcard and
//! writes received frames to the connections it holds locally, so a
//! user's devices can be spread across instances. Publishers never write
//! to their own sockets directly while the bridge is up, which is what
//! keeps a locally-connected user from seeing the frame twice.

use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::nats::NatsClient;
use crate::relay::{ConnectionRegistry, ServerFrame};
use crate::types::Result;

/// Subject prefix for per-user frame delivery
const USER_SUBJECT_PREFIX: &str = "caseline.user.";

/// Per-user frame publisher
pub struct NatsFanout {
    client: NatsClient,
}

impl NatsFanout {
    pub fn new(client: NatsClient) -> Self {
        Self { client }
    }

    /// Subject carrying frames for a user
    fn subject_for(user_id: &str) -> String {
        format!("{}{}", USER_SUBJECT_PREFIX, user_id)
    }

    /// User id carried by a subject, if it is a user subject
    fn user_from_subject(subject: &str) -> Option<&str> {
        subject.strip_prefix(USER_SUBJECT_PREFIX).filter(|u| !u.is_empty())
    }

    /// Publish a frame addressed to one user
    pub async fn publish(&self, user_id: &str, frame: &ServerFrame) -> Result<()> {
        let payload = serde_json::to_vec(frame)?;
        self.client
            .publish(Self::subject_for(user_id), Bytes::from(payload))
            .await
    }
}

/// Consume the user subject wildcard and deliver to local connections
pub fn spawn_delivery_task(fanout: Arc<NatsFanout>, registry: Arc<ConnectionRegistry>) {
    tokio::spawn(async move {
        let mut subscriber = match fanout
            .client
            .subscribe(format!("{}*", USER_SUBJECT_PREFIX))
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                warn!("fan-out subscription failed, bridge inactive: {}", e);
                return;
            }
        };
        info!("Fan-out delivery task subscribed to {}*", USER_SUBJECT_PREFIX);

        while let Some(msg) = subscriber.next().await {
            let Some(user_id) = NatsFanout::user_from_subject(&msg.subject) else {
                continue;
            };
            let frame: ServerFrame = match serde_json::from_slice(&msg.payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(subject = %msg.subject, "dropping malformed fan-out frame: {}", e);
                    continue;
                }
            };
            match registry.send_to_user(user_id, &frame).await {
                Ok(delivered) if delivered > 0 => {
                    debug!(user_id, delivered, "fan-out frame delivered");
                }
                Ok(_) => {} // User not connected to this instance
                Err(e) => warn!(user_id, "fan-out delivery failed: {}", e),
            }
        }
        info!("Fan-out delivery task stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_for_user() {
        assert_eq!(NatsFanout::subject_for("alice"), "caseline.user.alice");
    }

    #[test]
    fn test_user_from_subject() {
        assert_eq!(
            NatsFanout::user_from_subject("caseline.user.alice"),
            Some("alice")
        );
        assert_eq!(NatsFanout::user_from_subject("caseline.user."), None);
        assert_eq!(NatsFanout::user_from_subject("other.subject"), None);
    }
}
