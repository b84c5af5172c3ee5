use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use courier_types::events::ServerEvent;

/// Identifies one bind of a connection to a user. A reconnect gets a fresh
/// id, which is what lets `unbind` tell a stale close apart from the
/// currently-bound connection.
pub type ConnId = Uuid;

/// Single source of truth for "is this user currently reachable by push".
///
/// One active connection per user, last-bind-wins. Targeted delivery goes
/// through a per-connection unbounded channel so pushing never blocks the
/// caller; presence transitions ride a broadcast channel every connection
/// subscribes to. No lock is held across I/O.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// user_id -> (conn_id, outbox). The outbox preserves the order events
    /// were issued in (per-connection FIFO).
    connections: RwLock<HashMap<Uuid, (ConnId, mpsc::UnboundedSender<ServerEvent>)>>,

    /// Presence transitions fan out to all connected clients.
    broadcast_tx: broadcast::Sender<ServerEvent>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
                broadcast_tx,
            }),
        }
    }

    /// Bind a user to a fresh connection, replacing any prior handle for
    /// that user. Returns the connection's id and the receiving end of its
    /// outbox.
    pub async fn bind(&self, user_id: Uuid) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Remove the entry only if it still points at `conn_id`. A close
    /// racing a newer bind for the same user must not knock the fresh
    /// connection out. Returns whether the entry was removed.
    pub async fn unbind(&self, user_id: Uuid, conn_id: ConnId) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get(&user_id) {
            Some((stored, _)) if *stored == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }

    /// Snapshot of currently bound users.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.connections.read().await.keys().copied().collect()
    }

    /// Push a targeted event to a user's bound connection. Silently a no-op
    /// when the user is not connected — the durable store is authoritative
    /// and the client catches up on its next history fetch.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Subscribe to presence broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: Uuid = Uuid::from_u128(7);

    #[tokio::test]
    async fn bind_replaces_prior_handle() {
        let registry = PresenceRegistry::new();
        let (_c1, mut rx1) = registry.bind(USER).await;
        let (_c2, mut rx2) = registry.bind(USER).await;

        let delivered = registry
            .send_to_user(
                USER,
                ServerEvent::TypingStart {
                    sender: Uuid::from_u128(8),
                },
            )
            .await;
        assert!(delivered);

        // Only the newest connection receives; the replaced outbox is dead.
        assert!(rx2.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_close_does_not_unbind_the_reconnected_user() {
        let registry = PresenceRegistry::new();
        let (c1, _rx1) = registry.bind(USER).await;
        let (_c2, _rx2) = registry.bind(USER).await;

        // The old connection closes after the reconnect.
        assert!(!registry.unbind(USER, c1).await);
        assert!(registry.is_online(USER).await);
    }

    #[tokio::test]
    async fn unbind_removes_the_current_handle() {
        let registry = PresenceRegistry::new();
        let (c1, _rx) = registry.bind(USER).await;
        assert!(registry.unbind(USER, c1).await);
        assert!(!registry.is_online(USER).await);
        assert!(
            !registry
                .send_to_user(
                    USER,
                    ServerEvent::TypingStop {
                        sender: Uuid::from_u128(8)
                    }
                )
                .await
        );
    }
}
