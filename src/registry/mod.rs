use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::auth::Claims;
use crate::handlers::ServiceKind;
use crate::message::Frame;

// ============================================================================
// Connection handle
// ============================================================================

/// Live handle to one client socket.
///
/// Cheaply cloneable; frames are queued on an unbounded outbound channel and
/// drained by the dispatcher's forward task, so sends never block and frames
/// for a single socket leave in the order they were issued. The registry
/// holds the authoritative copy; everything else borrows clones that go dead
/// once the connection is closing.
#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: Uuid,
    kind: ServiceKind,
    user_id: u64,
    username: String,
    groups: Vec<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> ServiceKind {
        self.inner.kind
    }

    pub fn user_id(&self) -> u64 {
        self.inner.user_id
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn has_any_group(&self, required: &[&str]) -> bool {
        required
            .iter()
            .any(|needed| self.inner.groups.iter().any(|have| have == needed))
    }

    /// Queue a frame for this socket. Returns `false` when the outbound
    /// channel is gone (the forward task exited), which callers treat as a
    /// dead socket.
    pub fn send(&self, frame: &Frame) -> bool {
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    "Failed to serialize frame; this is a programming error"
                );
                return false;
            }
        };
        self.inner.tx.send(json).is_ok()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Error, Debug)]
#[error("user {user_id} already connected for service {kind:?}")]
pub struct AlreadyRegistered {
    pub kind: ServiceKind,
    pub user_id: u64,
}

/// Maps `(service, user)` to the live connection and tracks ids that are
/// closing so sends racing a disconnect are suppressed.
///
/// All operations take the lock once; readers never observe a half-updated
/// `(live, closing)` pair. A closing id is retained only until the next
/// `register` on the same key.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    live: HashMap<(ServiceKind, u64), Connection>,
    closing: HashSet<Uuid>,
    last_closed: HashMap<(ServiceKind, u64), Uuid>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection for `(kind, user)`.
    ///
    /// A duplicate key leaves the existing entry untouched and returns an
    /// error; the caller must close the new socket.
    pub async fn register(
        &self,
        kind: ServiceKind,
        claims: &Claims,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<Connection, AlreadyRegistered> {
        let mut inner = self.inner.write().await;
        let key = (kind, claims.user_id);

        if inner.live.contains_key(&key) {
            tracing::warn!(
                user_id = claims.user_id,
                service = kind.as_str(),
                "User already connected for this service"
            );
            return Err(AlreadyRegistered {
                kind,
                user_id: claims.user_id,
            });
        }

        // The previous closing id for this key has done its job.
        if let Some(old) = inner.last_closed.remove(&key) {
            inner.closing.remove(&old);
        }

        let conn = Connection {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                kind,
                user_id: claims.user_id,
                username: claims.username.clone(),
                groups: claims.groups.clone(),
                tx,
            }),
        };
        inner.live.insert(key, conn.clone());

        tracing::info!(
            user_id = claims.user_id,
            username = %claims.username,
            service = kind.as_str(),
            total = inner.live.len(),
            "Connection registered"
        );
        Ok(conn)
    }

    /// The live connection for `(kind, user)`, or `None` when absent or
    /// closing.
    pub async fn lookup(&self, kind: ServiceKind, user_id: u64) -> Option<Connection> {
        let inner = self.inner.read().await;
        let conn = inner.live.get(&(kind, user_id))?;
        if inner.closing.contains(&conn.id()) {
            return None;
        }
        Some(conn.clone())
    }

    /// Mark the connection closing and drop it from the live map. Idempotent.
    pub async fn disconnect(&self, kind: ServiceKind, user_id: u64) {
        let mut inner = self.inner.write().await;
        let key = (kind, user_id);
        let Some(conn) = inner.live.remove(&key) else {
            return;
        };
        inner.closing.insert(conn.id());
        if let Some(previous) = inner.last_closed.insert(key, conn.id()) {
            inner.closing.remove(&previous);
        }
        tracing::info!(
            user_id,
            service = kind.as_str(),
            total = inner.live.len(),
            "Connection closed"
        );
    }

    pub async fn is_closing(&self, id: Uuid) -> bool {
        self.inner.read().await.closing.contains(&id)
    }

    /// Snapshot of user ids with a live connection on any service.
    pub async fn active_users(&self) -> HashSet<u64> {
        self.inner
            .read()
            .await
            .live
            .keys()
            .map(|(_, user_id)| *user_id)
            .collect()
    }

    /// Send a frame to the user's connection on `kind`, evicting the entry
    /// when the socket turns out to be dead. Returns whether the frame was
    /// queued.
    pub async fn send_to_user(&self, kind: ServiceKind, user_id: u64, frame: &Frame) -> bool {
        let Some(conn) = self.lookup(kind, user_id).await else {
            return false;
        };
        if conn.send(frame) {
            true
        } else {
            tracing::warn!(
                user_id,
                service = kind.as_str(),
                "Send to dead socket; evicting connection"
            );
            self.disconnect(kind, user_id).await;
            false
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(user_id: u64, username: &str) -> Claims {
        Claims::new(user_id, username, vec![], 15)
    }

    fn make_channel() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = make_channel();

        let conn = registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx)
            .await
            .unwrap();

        let found = registry.lookup(ServiceKind::Echo, 1).await.unwrap();
        assert_eq!(found.id(), conn.id());
        assert_eq!(found.username(), "alice");
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected_and_keeps_first() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = make_channel();
        let (tx2, _rx2) = make_channel();

        let first = registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx1)
            .await
            .unwrap();
        let err = registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx2)
            .await
            .unwrap_err();
        assert_eq!(err.user_id, 1);

        let found = registry.lookup(ServiceKind::Echo, 1).await.unwrap();
        assert_eq!(found.id(), first.id(), "existing entry must be untouched");
    }

    #[tokio::test]
    async fn same_user_may_connect_on_different_services() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = make_channel();
        let (tx2, _rx2) = make_channel();

        registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx1)
            .await
            .unwrap();
        registry
            .register(ServiceKind::Room, &claims(1, "alice"), tx2)
            .await
            .unwrap();

        assert!(registry.lookup(ServiceKind::Echo, 1).await.is_some());
        assert!(registry.lookup(ServiceKind::Room, 1).await.is_some());
    }

    #[tokio::test]
    async fn disconnect_removes_and_marks_closing() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = make_channel();
        let conn = registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx)
            .await
            .unwrap();

        registry.disconnect(ServiceKind::Echo, 1).await;

        assert!(registry.lookup(ServiceKind::Echo, 1).await.is_none());
        assert!(registry.is_closing(conn.id()).await);

        // Idempotent.
        registry.disconnect(ServiceKind::Echo, 1).await;
        assert!(registry.is_closing(conn.id()).await);
    }

    #[tokio::test]
    async fn reregister_drops_the_previous_closing_id() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = make_channel();
        let old = registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx1)
            .await
            .unwrap();
        registry.disconnect(ServiceKind::Echo, 1).await;
        assert!(registry.is_closing(old.id()).await);

        let (tx2, _rx2) = make_channel();
        registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx2)
            .await
            .unwrap();

        assert!(!registry.is_closing(old.id()).await);
    }

    #[tokio::test]
    async fn active_users_spans_all_services() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = make_channel();
        let (tx2, _rx2) = make_channel();
        let (tx3, _rx3) = make_channel();

        registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx1)
            .await
            .unwrap();
        registry
            .register(ServiceKind::Room, &claims(2, "bob"), tx2)
            .await
            .unwrap();
        registry
            .register(ServiceKind::Logs, &claims(1, "alice"), tx3)
            .await
            .unwrap();

        let users = registry.active_users().await;
        assert_eq!(users, HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn send_to_user_delivers_serialized_frame() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = make_channel();
        registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx)
            .await
            .unwrap();

        assert!(
            registry
                .send_to_user(ServiceKind::Echo, 1, &Frame::system("hello"))
                .await
        );
        let raw = rx.recv().await.unwrap();
        let frame: Frame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame.message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn send_to_dead_socket_evicts_the_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = make_channel();
        registry
            .register(ServiceKind::Echo, &claims(1, "alice"), tx)
            .await
            .unwrap();
        drop(rx);

        assert!(
            !registry
                .send_to_user(ServiceKind::Echo, 1, &Frame::system("hello"))
                .await
        );
        assert!(registry.lookup(ServiceKind::Echo, 1).await.is_none());
    }

    #[tokio::test]
    async fn send_to_absent_user_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(
            !registry
                .send_to_user(ServiceKind::Echo, 99, &Frame::system("dropped"))
                .await
        );
    }
}
