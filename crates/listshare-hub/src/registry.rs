//! Live viewer connections
//!
//! The [`ConnectionRegistry`] tracks, per todo list, the WebSocket sessions
//! watching it and fans change notifications out to all of them except the
//! session that made the change.
//!
//! Two maps are kept, each behind its own `RwLock`:
//! - `sessions`: session id → todo list id (the global index)
//! - `subscribers`: todo list id → session id → [`Connection`]
//!
//! Writers always take `sessions` before `subscribers`. Broadcasts only take
//! a read lock on `subscribers`, and delivery is a non-blocking channel send,
//! so no lock is ever held across transport I/O.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::protocol::Envelope;

/// Outbound frames buffered per connection before deliveries start failing.
pub const OUTBOUND_BUFFER: usize = 64;

/// One live viewer session.
///
/// Holds the sending half of the connection's outbound queue; the WebSocket
/// task owns the receiving half and writes frames to the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    session_id: String,
    todo_id: String,
    outbound: mpsc::Sender<String>,
}

impl Connection {
    /// Create a connection and the receiver its transport writer drains.
    pub fn new(
        session_id: impl Into<String>,
        todo_id: impl Into<String>,
    ) -> (Self, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let connection = Self {
            session_id: session_id.into(),
            todo_id: todo_id.into(),
            outbound,
        };
        (connection, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn todo_id(&self) -> &str {
        &self.todo_id
    }

    /// Whether both handles feed the same transport.
    pub fn is_same(&self, other: &Connection) -> bool {
        self.outbound.same_channel(&other.outbound)
    }

    /// Queue a text frame without waiting.
    pub fn send_text(&self, text: String) -> Result<(), mpsc::error::TrySendError<String>> {
        self.outbound.try_send(text)
    }
}

/// Registry of live connections, grouped by todo list.
///
/// Owned by the server context and shared by `Arc`. When constructed
/// disabled, every operation is a no-op.
#[derive(Debug)]
pub struct ConnectionRegistry {
    enabled: bool,
    sessions: RwLock<HashMap<String, String>>,
    subscribers: RwLock<HashMap<String, HashMap<String, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(enabled: bool) -> Self {
        if enabled {
            info!("Connection registry started");
        } else {
            info!("Connection registry disabled");
        }
        Self {
            enabled,
            sessions: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a connection under its todo list.
    ///
    /// A session id that is already registered is replaced, including when
    /// it previously watched a different list.
    pub async fn join(&self, connection: Connection) {
        if !self.enabled {
            return;
        }

        let session_id = connection.session_id.clone();
        let todo_id = connection.todo_id.clone();

        let mut sessions = self.sessions.write().await;
        let mut subscribers = self.subscribers.write().await;

        if let Some(previous) = sessions.insert(session_id.clone(), todo_id.clone()) {
            if previous != todo_id {
                remove_subscriber(&mut subscribers, &previous, &session_id);
            } else {
                debug!(session_id = %session_id, todo_id = %todo_id, "Replacing existing session");
            }
        }

        subscribers
            .entry(todo_id.clone())
            .or_default()
            .insert(session_id.clone(), connection);

        debug!(session_id = %session_id, todo_id = %todo_id, "Connection joined");
    }

    /// Deregister a session. Absent sessions are ignored.
    ///
    /// Returns whether anything was removed.
    pub async fn leave(&self, session_id: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let mut sessions = self.sessions.write().await;
        let Some(todo_id) = sessions.remove(session_id) else {
            return false;
        };

        let mut subscribers = self.subscribers.write().await;
        remove_subscriber(&mut subscribers, &todo_id, session_id);

        debug!(session_id = %session_id, todo_id = %todo_id, "Connection left");
        true
    }

    /// Deregister one specific connection.
    ///
    /// Unlike [`leave`](Self::leave), this is a no-op when the session's slot
    /// has since been taken over by a newer connection with the same session
    /// id, so a superseded socket closing late cannot evict its replacement.
    pub async fn leave_connection(&self, connection: &Connection) -> bool {
        if !self.enabled {
            return false;
        }

        let mut sessions = self.sessions.write().await;
        let mut subscribers = self.subscribers.write().await;

        let registered = subscribers
            .get(&connection.todo_id)
            .and_then(|set| set.get(&connection.session_id))
            .is_some_and(|current| current.is_same(connection));
        if !registered {
            debug!(
                session_id = %connection.session_id,
                todo_id = %connection.todo_id,
                "Connection already replaced or gone"
            );
            return false;
        }

        remove_subscriber(&mut subscribers, &connection.todo_id, &connection.session_id);
        if sessions.get(&connection.session_id) == Some(&connection.todo_id) {
            sessions.remove(&connection.session_id);
        }

        debug!(
            session_id = %connection.session_id,
            todo_id = %connection.todo_id,
            "Connection left"
        );
        true
    }

    /// Deliver `envelope` to every subscriber of `todo_id` except
    /// `exclude_session_id`.
    ///
    /// Returns the number of deliveries attempted. A failed delivery is
    /// logged and does not stop the rest; the failing connection stays
    /// registered until its own read loop ends.
    pub async fn broadcast(
        &self,
        todo_id: &str,
        exclude_session_id: &str,
        envelope: &Envelope<'_>,
    ) -> usize {
        if !self.enabled {
            return 0;
        }

        let text = match envelope.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(todo_id = %todo_id, error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let subscribers = self.subscribers.read().await;
        let Some(connections) = subscribers.get(todo_id) else {
            return 0;
        };

        let mut attempted = 0;
        for connection in connections.values() {
            if connection.session_id == exclude_session_id {
                continue;
            }
            attempted += 1;
            if let Err(e) = connection.send_text(text.clone()) {
                warn!(
                    todo_id = %todo_id,
                    session_id = %connection.session_id,
                    error = %e,
                    "Failed to deliver broadcast"
                );
            }
        }

        debug!(todo_id = %todo_id, attempted, "Broadcast complete");
        attempted
    }

    /// Number of registered sessions across all lists.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of sessions watching one list.
    pub async fn subscriber_count(&self, todo_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(todo_id)
            .map_or(0, HashMap::len)
    }

    /// Number of lists with at least one subscriber.
    pub async fn watched_list_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Remove one session from a list's subscriber set, dropping the set when it
/// becomes empty.
fn remove_subscriber(
    subscribers: &mut HashMap<String, HashMap<String, Connection>>,
    todo_id: &str,
    session_id: &str,
) {
    if let Some(set) = subscribers.get_mut(todo_id) {
        set.remove(session_id);
        if set.is_empty() {
            subscribers.remove(todo_id);
        }
    }
}
