use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::handlers::ServiceKind;
use crate::registry::Connection;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Connect,
    Message,
    Disconnect,
}

/// Ephemeral record handed to service listeners; lives only for the duration
/// of one emission.
#[derive(Clone)]
pub struct Event {
    pub event_type: EventType,
    pub kind: ServiceKind,
    pub user_id: u64,
    pub username: String,
    pub data: Option<Value>,
    pub conn: Option<Connection>,
}

impl Event {
    fn from_conn(event_type: EventType, kind: ServiceKind, conn: &Connection) -> Self {
        Event {
            event_type,
            kind,
            user_id: conn.user_id(),
            username: conn.username().to_string(),
            data: None,
            conn: Some(conn.clone()),
        }
    }

    pub fn connect(kind: ServiceKind, conn: &Connection) -> Self {
        Self::from_conn(EventType::Connect, kind, conn)
    }

    pub fn message(kind: ServiceKind, conn: &Connection, data: Value) -> Self {
        Event {
            data: Some(data),
            ..Self::from_conn(EventType::Message, kind, conn)
        }
    }

    pub fn disconnect(kind: ServiceKind, conn: &Connection) -> Self {
        Self::from_conn(EventType::Disconnect, kind, conn)
    }
}

// ============================================================================
// Emitter
// ============================================================================

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(Event) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// Per-service publish/subscribe of connection events.
///
/// Listeners are plain function references keyed by the id returned from
/// [`EventEmitter::on`]; registration order is preserved but emission is
/// concurrent, so sibling ordering is unobservable.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<HashMap<EventType, Vec<(ListenerId, Listener)>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on<F>(&self, event_type: EventType, listener: F) -> ListenerId
    where
        F: Fn(Event) -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub async fn off(&self, event_type: EventType, id: ListenerId) {
        if let Some(listeners) = self.listeners.write().await.get_mut(&event_type) {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    /// Invoke every listener for the event's type concurrently and join on
    /// them. Per-listener failures are logged and swallowed so one failing
    /// listener cannot starve the others; dropping the returned future
    /// cancels every listener.
    pub async fn emit(&self, event: Event) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read().await;
            match listeners.get(&event.event_type) {
                Some(registered) => registered.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };

        let results =
            join_all(snapshot.iter().map(|listener| (**listener)(event.clone()))).await;
        for err in results.into_iter().filter_map(Result::err) {
            tracing::error!(
                error = %err,
                event_type = ?event.event_type,
                user_id = event.user_id,
                "Error in event listener"
            );
        }
    }
}

/// One emitter per service. Handlers register only on their own service's
/// emitter; cross-service traffic goes through the AMQP bridge or a direct
/// registry lookup.
#[derive(Clone, Default)]
pub struct ServiceEmitters {
    echo: EventEmitter,
    logs: EventEmitter,
    room: EventEmitter,
    resume: EventEmitter,
}

impl ServiceEmitters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(&self, kind: ServiceKind) -> &EventEmitter {
        match kind {
            ServiceKind::Echo => &self.echo,
            ServiceKind::Logs => &self.logs,
            ServiceKind::Room => &self.room,
            ServiceKind::Resume => &self.resume,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
