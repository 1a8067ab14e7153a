//! Connection registry
//!
//! Active WebSocket connections indexed by user id. A user may hold
//! several connections (one per device); frames addressed to a user go to
//! all of them. Presence transitions are debounced: going offline waits a
//! grace period, and a reconnect inside it cancels the offline event so a
//! page refresh never flaps presence.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use hyper_tungstenite::WebSocketStream;
use hyper_util::rt::TokioIo;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::relay::frame::ServerFrame;
use crate::types::{CaselineError, Result};

/// WebSocket write half behind a shared lock
pub type WsSink =
    Arc<Mutex<SplitSink<WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>, Message>>>;

/// Write side of a connection, abstracted for testing
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, msg: Message) -> Result<()>;
}

/// Production sink over a hyper-upgraded WebSocket
pub struct WsFrameSink {
    write: WsSink,
}

impl WsFrameSink {
    pub fn new(write: WsSink) -> Self {
        Self { write }
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&self, msg: Message) -> Result<()> {
        self.write
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| CaselineError::WebSocket(format!("send failed: {}", e)))
    }
}

/// Presence transition emitted by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub user_id: String,
    pub online: bool,
}

struct ConnectionSlot {
    id: Uuid,
    sink: Arc<dyn FrameSink>,
}

/// Thread-safe store of active connections, indexed by user id
pub struct ConnectionRegistry {
    connections: DashMap<String, Vec<ConnectionSlot>>,
    count: AtomicUsize,
    max_connections: usize,
    /// Token of the pending offline timer per user; a reconnect replaces
    /// the token so the stale timer finds itself cancelled
    pending_offline: DashMap<String, Uuid>,
    presence_tx: broadcast::Sender<PresenceEvent>,
    grace: Duration,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize, grace: Duration) -> Self {
        let (presence_tx, _) = broadcast::channel(256);
        Self {
            connections: DashMap::new(),
            count: AtomicUsize::new(0),
            max_connections,
            pending_offline: DashMap::new(),
            presence_tx,
            grace,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_at_capacity(&self) -> bool {
        self.count.load(Ordering::Relaxed) >= self.max_connections
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections
            .get(user_id)
            .map(|slots| !slots.is_empty())
            .unwrap_or(false)
    }

    /// Subscribe to presence transitions
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence_tx.subscribe()
    }

    /// Register a new connection for a user
    ///
    /// Returns the connection id used to unregister this connection.
    pub fn register(&self, user_id: &str, sink: Arc<dyn FrameSink>) -> Result<Uuid> {
        if self.is_at_capacity() {
            return Err(CaselineError::WebSocket(
                "connection registry at capacity".to_string(),
            ));
        }

        let conn_id = Uuid::new_v4();
        let mut slots = self.connections.entry(user_id.to_string()).or_default();
        let was_offline = slots.is_empty();
        slots.push(ConnectionSlot {
            id: conn_id,
            sink,
        });
        drop(slots);

        self.count.fetch_add(1, Ordering::Relaxed);

        // Reconnect inside the grace window cancels the pending offline
        let cancelled = self.pending_offline.remove(user_id).is_some();
        if was_offline && !cancelled {
            let _ = self.presence_tx.send(PresenceEvent {
                user_id: user_id.to_string(),
                online: true,
            });
        }

        debug!(
            user_id,
            %conn_id,
            count = self.connection_count(),
            "connection registered"
        );
        Ok(conn_id)
    }

    /// Unregister a connection
    ///
    /// When this was the user's last connection, the offline event is
    /// deferred by the grace period and suppressed if they reconnect.
    pub fn unregister(self: &Arc<Self>, user_id: &str, conn_id: Uuid) {
        let now_empty = {
            let Some(mut slots) = self.connections.get_mut(user_id) else {
                return;
            };
            let before = slots.len();
            slots.retain(|slot| slot.id != conn_id);
            if slots.len() < before {
                self.count.fetch_sub(1, Ordering::Relaxed);
            }
            slots.is_empty()
        };

        debug!(
            user_id,
            %conn_id,
            count = self.connection_count(),
            "connection unregistered"
        );

        if !now_empty {
            return;
        }
        self.connections.remove_if(user_id, |_, slots| slots.is_empty());

        let token = Uuid::new_v4();
        self.pending_offline.insert(user_id.to_string(), token);

        let registry = Arc::clone(self);
        let user = user_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(registry.grace).await;
            let still_pending = registry
                .pending_offline
                .remove_if(&user, |_, t| *t == token)
                .is_some();
            if still_pending && !registry.is_online(&user) {
                let _ = registry.presence_tx.send(PresenceEvent {
                    user_id: user,
                    online: false,
                });
            }
        });
    }

    /// Send a frame to every connection a user holds
    ///
    /// Returns the number of connections the frame reached. A connection
    /// that fails to accept the frame is dropped from the registry.
    pub async fn send_to_user(&self, user_id: &str, frame: &ServerFrame) -> Result<usize> {
        let msg = frame.to_message()?;

        let sinks: Vec<(Uuid, Arc<dyn FrameSink>)> = match self.connections.get(user_id) {
            Some(slots) => slots
                .iter()
                .map(|s| (s.id, Arc::clone(&s.sink)))
                .collect(),
            None => return Ok(0),
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sink) in sinks {
            match sink.send(msg.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(user_id, conn_id = %id, "dropping dead connection: {}", e);
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            if let Some(mut slots) = self.connections.get_mut(user_id) {
                let before = slots.len();
                slots.retain(|slot| !dead.contains(&slot.id));
                let removed = before - slots.len();
                self.count.fetch_sub(removed, Ordering::Relaxed);
            }
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        frames: StdMutex<Vec<Message>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: StdMutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                frames: StdMutex::new(Vec::new()),
                fail: true,
            })
        }

        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&self, msg: Message) -> Result<()> {
            if self.fail {
                return Err(CaselineError::WebSocket("closed".into()));
            }
            self.frames.lock().unwrap().push(msg);
            Ok(())
        }
    }

    fn frame() -> ServerFrame {
        ServerFrame::Presence {
            user_id: "peer".into(),
            online: true,
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_all_devices() {
        let registry = Arc::new(ConnectionRegistry::new(16, Duration::from_millis(10)));
        let phone = RecordingSink::new();
        let laptop = RecordingSink::new();
        registry.register("alice", phone.clone()).unwrap();
        registry.register("alice", laptop.clone()).unwrap();

        let delivered = registry.send_to_user("alice", &frame()).await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(phone.count(), 1);
        assert_eq!(laptop.count(), 1);
    }

    #[tokio::test]
    async fn test_send_to_offline_user_is_zero() {
        let registry = Arc::new(ConnectionRegistry::new(16, Duration::from_millis(10)));
        let delivered = registry.send_to_user("ghost", &frame()).await.unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_dead_connection_is_pruned() {
        let registry = Arc::new(ConnectionRegistry::new(16, Duration::from_millis(10)));
        registry.register("bob", RecordingSink::failing()).unwrap();
        let good = RecordingSink::new();
        registry.register("bob", good.clone()).unwrap();

        let delivered = registry.send_to_user("bob", &frame()).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_rejects_new_connections() {
        let registry = Arc::new(ConnectionRegistry::new(1, Duration::from_millis(10)));
        registry.register("a", RecordingSink::new()).unwrap();
        assert!(registry.register("b", RecordingSink::new()).is_err());
    }

    #[tokio::test]
    async fn test_offline_waits_for_grace_period() {
        let registry = Arc::new(ConnectionRegistry::new(16, Duration::from_millis(50)));
        let mut presence = registry.subscribe_presence();

        let conn = registry.register("carol", RecordingSink::new()).unwrap();
        assert_eq!(
            presence.recv().await.unwrap(),
            PresenceEvent {
                user_id: "carol".into(),
                online: true
            }
        );

        registry.unregister("carol", conn);
        // Nothing yet: the grace timer is still running
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(presence.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            presence.try_recv().unwrap(),
            PresenceEvent {
                user_id: "carol".into(),
                online: false
            }
        );
    }

    #[tokio::test]
    async fn test_reconnect_cancels_pending_offline() {
        let registry = Arc::new(ConnectionRegistry::new(16, Duration::from_millis(40)));
        let mut presence = registry.subscribe_presence();

        let conn = registry.register("dave", RecordingSink::new()).unwrap();
        let _ = presence.recv().await.unwrap();

        registry.unregister("dave", conn);
        registry.register("dave", RecordingSink::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Neither an offline nor a second online event fired
        assert!(presence.try_recv().is_err());
    }
}
