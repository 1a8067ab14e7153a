//! Real-time message relay
//!
//! Each signed-in user holds WebSocket connections tracked in the
//! [`registry`]. Frames addressed to a conversation fan out to every
//! participant except the sender. When the NATS bridge is active, frames
//! are published to per-user subjects instead of being written to local
//! sockets directly; every instance (this one included) subscribes and
//! delivers to the connections it holds, so a user's devices can sit on
//! different instances without double delivery.

pub mod frame;
pub mod registry;
pub mod typing;

pub use frame::{ClientFrame, MessagePayload, NotificationPayload, ServerFrame};
pub use registry::{ConnectionRegistry, FrameSink, PresenceEvent, WsFrameSink, WsSink};
pub use typing::TypingTracker;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::messaging::ConversationDirectory;
use crate::nats::NatsFanout;
use crate::types::Result;

/// Fan-out hub tying the registry, typing state, and the NATS bridge
pub struct MessageRelay {
    registry: Arc<ConnectionRegistry>,
    typing: Arc<TypingTracker>,
    directory: ConversationDirectory,
    fanout: Option<Arc<NatsFanout>>,
}

impl MessageRelay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        typing: Arc<TypingTracker>,
        directory: ConversationDirectory,
        fanout: Option<Arc<NatsFanout>>,
    ) -> Self {
        Self {
            registry,
            typing,
            directory,
            fanout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn typing(&self) -> &Arc<TypingTracker> {
        &self.typing
    }

    /// Deliver a frame to one user, through the bridge when active
    pub async fn deliver(&self, user_id: &str, frame: &ServerFrame) -> Result<()> {
        if let Some(fanout) = &self.fanout {
            match fanout.publish(user_id, frame).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // Bridge hiccup: fall back to the sockets this
                    // instance holds so local users still get the frame
                    warn!(user_id, "fan-out publish failed, delivering locally: {}", e);
                }
            }
        }
        self.deliver_local(user_id, frame).await?;
        Ok(())
    }

    /// Deliver a frame to the user's connections on this instance only
    pub async fn deliver_local(&self, user_id: &str, frame: &ServerFrame) -> Result<usize> {
        self.registry.send_to_user(user_id, frame).await
    }

    /// Fan a frame out to every conversation participant except `exclude`
    pub async fn fan_out(
        &self,
        conversation_id: &str,
        exclude: Option<&str>,
        frame: &ServerFrame,
    ) -> Result<()> {
        let Some(participants) = self.directory.participants(conversation_id).await? else {
            debug!(conversation_id, "fan-out to unknown conversation dropped");
            return Ok(());
        };

        for user_id in &participants {
            if Some(user_id.as_str()) == exclude {
                continue;
            }
            self.deliver(user_id, frame).await?;
        }
        Ok(())
    }

    /// Handle a typing start from a client
    ///
    /// Only the transition into typing fans out; refreshes are absorbed.
    pub async fn typing_started(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        if !self.directory.is_participant(conversation_id, user_id).await? {
            debug!(conversation_id, user_id, "typing from non-participant ignored");
            return Ok(());
        }
        if self.typing.start(conversation_id, user_id) {
            self.fan_out(
                conversation_id,
                Some(user_id),
                &ServerFrame::Typing {
                    conversation_id: conversation_id.to_string(),
                    user_id: user_id.to_string(),
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Handle an explicit typing stop (or a sent message)
    pub async fn typing_stopped(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        if self.typing.stop(conversation_id, user_id) {
            self.fan_out(
                conversation_id,
                Some(user_id),
                &ServerFrame::TypingStopped {
                    conversation_id: conversation_id.to_string(),
                    user_id: user_id.to_string(),
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Push a presence transition to everyone who shares a conversation
    /// with the user
    pub async fn broadcast_presence(&self, event: &PresenceEvent) -> Result<()> {
        let peers = self.directory.peers_of_user(&event.user_id).await?;
        let frame = ServerFrame::Presence {
            user_id: event.user_id.clone(),
            online: event.online,
        };
        for peer in peers {
            self.deliver(&peer, &frame).await?;
        }
        Ok(())
    }
}

/// Forward registry presence transitions to conversation peers
pub fn spawn_presence_task(relay: Arc<MessageRelay>) {
    let mut events = relay.registry.subscribe_presence();
    tokio::spawn(async move {
        info!("Presence broadcast task started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(user_id = %event.user_id, online = event.online, "presence transition");
                    if let Err(e) = relay.broadcast_presence(&event).await {
                        warn!("presence broadcast failed: {}", e);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("presence task lagged, {} events dropped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("Presence channel closed, task exiting");
                    break;
                }
            }
        }
    });
}

/// Expire abandoned typing states and fan out the stop events
pub fn spawn_typing_sweep(relay: Arc<MessageRelay>) {
    let period = relay.typing.timeout().checked_div(2).unwrap_or(Duration::from_secs(1));
    let period = period.max(Duration::from_millis(250));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            for (conversation_id, user_id) in relay.typing.collect_expired() {
                debug!(conversation_id, user_id, "typing state expired");
                let frame = ServerFrame::TypingStopped {
                    conversation_id: conversation_id.clone(),
                    user_id: user_id.clone(),
                };
                if let Err(e) = relay.fan_out(&conversation_id, Some(&user_id), &frame).await {
                    warn!("typing expiry fan-out failed: {}", e);
                }
            }
        }
    });
}
