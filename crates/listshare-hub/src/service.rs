//! Todo list operations
//!
//! [`TodoService`] ties the store, the reconciler and the connection registry
//! together: create, get and update lists, and join/leave live viewers.
//!
//! Updates are read-modify-write against the store. The write is conditional
//! on the version that was read, so two concurrent edits of the same list
//! cannot silently overwrite each other: the loser reloads and reconciles
//! again, up to [`MAX_UPDATE_ATTEMPTS`] times.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ItemInput, TodoList};
use crate::protocol::Envelope;
use crate::reconcile::{reconcile, stamp_items};
use crate::registry::{Connection, ConnectionRegistry};
use crate::store::{ConditionalWrite, SharedStore, todo_key};
use crate::token;

/// Lifetime of a list when the creator does not ask for a positive one.
pub const DEFAULT_EXPIRATION_HOURS: i64 = 24;

/// How many times an update is reconciled before giving up on a list that
/// keeps changing underneath it.
pub const MAX_UPDATE_ATTEMPTS: usize = 3;

/// A freshly created list together with its raw edit token.
///
/// This is the only place the raw token ever appears.
#[derive(Debug, Clone)]
pub struct CreatedTodoList {
    pub todo_list: TodoList,
    pub edit_token: String,
}

pub struct TodoService {
    store: SharedStore,
    registry: Arc<ConnectionRegistry>,
    default_expiration_hours: i64,
}

impl TodoService {
    pub fn new(
        store: SharedStore,
        registry: Arc<ConnectionRegistry>,
        default_expiration_hours: i64,
    ) -> Self {
        let default_expiration_hours = if default_expiration_hours > 0 {
            default_expiration_hours
        } else {
            warn!(
                configured = default_expiration_hours,
                fallback = DEFAULT_EXPIRATION_HOURS,
                "Non-positive default expiration, using fallback"
            );
            DEFAULT_EXPIRATION_HOURS
        };

        Self {
            store,
            registry,
            default_expiration_hours,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Create and persist a new list.
    ///
    /// A non-positive `expiration_hours` falls back to the configured default.
    pub async fn create(
        &self,
        expiration_hours: i64,
        items: Vec<ItemInput>,
    ) -> Result<CreatedTodoList> {
        let hours = if expiration_hours > 0 {
            expiration_hours
        } else {
            self.default_expiration_hours
        };

        let now = Utc::now();
        let expires_at = Duration::try_hours(hours)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::Validation(format!("expiration_hours {hours} is out of range"))
            })?;

        let edit_token = token::generate();
        let todo_list = TodoList {
            id: Uuid::new_v4().to_string(),
            items: stamp_items(items, &Default::default(), now),
            created_at: now,
            expires_at,
            edit_token_hash: token::digest(&edit_token),
            version: 0,
        };

        let ttl = todo_list.remaining_ttl(now).ok_or_else(|| {
            Error::Validation(format!("expiration_hours {hours} is out of range"))
        })?;
        let bytes = serde_json::to_vec(&todo_list)?;
        self.store
            .set_with_expiry(&todo_key(&todo_list.id), bytes, ttl)
            .await?;

        info!(
            todo_id = %todo_list.id,
            items = todo_list.items.len(),
            expiration_hours = hours,
            "Created todo list"
        );

        Ok(CreatedTodoList {
            todo_list,
            edit_token,
        })
    }

    /// Load a list. Expired and never-created lists are both `NotFound`.
    pub async fn get(&self, id: &str) -> Result<TodoList> {
        let bytes = self
            .store
            .get(&todo_key(id))
            .await?
            .ok_or(Error::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replace a list's items and notify the other viewers.
    ///
    /// The list's expiry is kept as is; editing does not extend it.
    /// `session_id` is the editor's own viewer session, which does not get
    /// an echo of its change. Broadcast problems never fail the update.
    pub async fn update(
        &self,
        id: &str,
        claimed_token: &str,
        items: Vec<ItemInput>,
        session_id: &str,
    ) -> Result<TodoList> {
        let key = todo_key(id);

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let stored = self.get(id).await?;

            let mut updated = match reconcile(&stored, claimed_token, items.clone(), Utc::now()) {
                Ok(updated) => updated,
                Err(e) => {
                    info!(todo_id = %id, "Rejected update with invalid edit token");
                    return Err(e);
                }
            };
            updated.version = stored.version + 1;

            // Expired between the read and now
            let ttl = stored.remaining_ttl(Utc::now()).ok_or(Error::NotFound)?;

            let bytes = serde_json::to_vec(&updated)?;
            let outcome = self
                .store
                .set_if_version(&key, bytes, ttl, stored.version, stored_version)
                .await?;

            match outcome {
                ConditionalWrite::Written => {
                    info!(
                        todo_id = %id,
                        version = updated.version,
                        items = updated.items.len(),
                        "Updated todo list"
                    );
                    self.notify(&updated, session_id).await;
                    return Ok(updated);
                }
                ConditionalWrite::VersionMismatch => {
                    debug!(todo_id = %id, attempt, "Concurrent update detected, retrying");
                }
            }
        }

        warn!(todo_id = %id, attempts = MAX_UPDATE_ATTEMPTS, "Giving up on contended update");
        Err(Error::Conflict)
    }

    async fn notify(&self, todo_list: &TodoList, updated_by: &str) {
        let envelope = Envelope::Update {
            todo_list: todo_list.public(),
            updated_by,
        };
        let attempted = self
            .registry
            .broadcast(&todo_list.id, updated_by, &envelope)
            .await;
        debug!(todo_id = %todo_list.id, recipients = attempted, "Broadcast update");
    }

    /// Register a viewer and greet it with a `connected` frame.
    pub async fn join(&self, connection: Connection) -> Result<()> {
        if !self.registry.is_enabled() {
            return Err(Error::FeatureUnavailable);
        }

        let greeting = Envelope::Connected.to_text()?;
        let session_id = connection.session_id().to_string();
        let todo_id = connection.todo_id().to_string();

        if let Err(e) = connection.send_text(greeting) {
            warn!(session_id = %session_id, error = %e, "Failed to queue welcome message");
        }
        self.registry.join(connection).await;

        info!(session_id = %session_id, todo_id = %todo_id, "Viewer connected");
        Ok(())
    }

    /// Deregister a viewer by session id.
    pub async fn leave(&self, session_id: &str) -> bool {
        let removed = self.registry.leave(session_id).await;
        if removed {
            info!(session_id = %session_id, "Viewer disconnected");
        }
        removed
    }

    /// Deregister one viewer connection, unless a newer connection has taken
    /// over its session id in the meantime.
    pub async fn leave_connection(&self, connection: &Connection) -> bool {
        let removed = self.registry.leave_connection(connection).await;
        if removed {
            info!(
                session_id = %connection.session_id(),
                todo_id = %connection.todo_id(),
                "Viewer disconnected"
            );
        }
        removed
    }
}

/// Read the write version out of a stored list without decoding the rest.
fn stored_version(bytes: &[u8]) -> Option<u64> {
    #[derive(Deserialize)]
    struct Versioned {
        #[serde(default)]
        version: u64,
    }

    serde_json::from_slice::<Versioned>(bytes)
        .ok()
        .map(|v| v.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};
    use std::collections::HashSet;

    fn service_with(store: Arc<MemoryStore>) -> TodoService {
        TodoService::new(store, Arc::new(ConnectionRegistry::new(true)), 24)
    }

    fn service() -> TodoService {
        service_with(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_stamps_items() {
        let service = service();
        let before = Utc::now();

        let created = service
            .create(24, vec![ItemInput::new("a"), ItemInput::existing("forged", "b")])
            .await
            .unwrap();
        let list = &created.todo_list;

        assert!(!created.edit_token.is_empty());
        assert_eq!(list.edit_token_hash, token::digest(&created.edit_token));
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].order, 0);
        assert_eq!(list.items[1].order, 1);
        assert_ne!(list.items[1].id, "forged");
        assert!(list.items.iter().all(|i| i.created_at >= before));
        assert_eq!(list.expires_at - list.created_at, Duration::hours(24));
    }

    #[tokio::test]
    async fn test_non_positive_expiration_uses_default() {
        let service = TodoService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ConnectionRegistry::new(true)),
            6,
        );

        for hours in [0, -5] {
            let list = service.create(hours, Vec::new()).await.unwrap().todo_list;
            assert_eq!(list.expires_at - list.created_at, Duration::hours(6));
        }
    }

    #[tokio::test]
    async fn test_absurd_expiration_is_rejected() {
        let service = service();
        let result = service.create(i64::MAX, Vec::new()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let service = service();
        assert!(matches!(service.get("nope").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn test_stored_form_never_contains_raw_token() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());

        let created = service.create(1, vec![ItemInput::new("a")]).await.unwrap();
        let bytes = store
            .get(&todo_key(&created.todo_list.id))
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(!text.contains(&created.edit_token));
        assert!(text.contains(&created.todo_list.edit_token_hash));
    }

    #[tokio::test]
    async fn test_create_update_reject_scenario() {
        let service = service();

        let created = service.create(24, vec![ItemInput::new("a")]).await.unwrap();
        let id = created.todo_list.id.clone();
        let item = created.todo_list.items[0].clone();
        assert_eq!(item.order, 0);

        let updated = service
            .update(
                &id,
                &created.edit_token,
                vec![ItemInput::existing(&item.id, "a2")],
                "s1",
            )
            .await
            .unwrap();
        assert_eq!(updated.items[0].id, item.id);
        assert_eq!(updated.items[0].content, "a2");
        assert_eq!(updated.items[0].created_at, item.created_at);

        let rejected = service
            .update(&id, &token::generate(), vec![ItemInput::new("evil")], "s2")
            .await;
        assert!(matches!(rejected, Err(Error::Unauthorized)));

        let reloaded = service.get(&id).await.unwrap();
        assert_eq!(reloaded, updated);
        assert_eq!(reloaded.items[0].content, "a2");
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_bytes_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let created = service.create(1, vec![ItemInput::new("a")]).await.unwrap();
        let key = todo_key(&created.todo_list.id);

        let before = store.get(&key).await.unwrap();
        let _ = service
            .update(&created.todo_list.id, "wrong", Vec::new(), "s")
            .await;
        let after = store.get(&key).await.unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let service = service();
        let result = service.update("missing", "token", Vec::new(), "s").await;
        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn test_token_digest_and_expiry_survive_updates() {
        let service = service();
        let created = service.create(3, vec![ItemInput::new("a")]).await.unwrap();
        let original = created.todo_list.clone();

        let mut seen_ids = HashSet::new();
        for round in 0..5 {
            let updated = service
                .update(
                    &original.id,
                    &created.edit_token,
                    vec![ItemInput::new(format!("round {round}"))],
                    "s",
                )
                .await
                .unwrap();
            assert_eq!(updated.edit_token_hash, original.edit_token_hash);
            assert_eq!(updated.expires_at, original.expires_at);
            assert_eq!(updated.created_at, original.created_at);
            assert_eq!(updated.version, round + 1);
            assert!(seen_ids.insert(updated.items[0].id.clone()));
        }
    }

    #[tokio::test]
    async fn test_update_broadcasts_to_others_only() {
        let service = service();
        let created = service.create(1, Vec::new()).await.unwrap();
        let id = created.todo_list.id.clone();

        let (editor, mut editor_rx) = Connection::new("editor", id.clone());
        let (viewer, mut viewer_rx) = Connection::new("viewer", id.clone());
        service.join(editor).await.unwrap();
        service.join(viewer).await.unwrap();

        // Drain the welcome frames
        assert_eq!(editor_rx.try_recv().unwrap(), r#"{"type":"connected"}"#);
        assert_eq!(viewer_rx.try_recv().unwrap(), r#"{"type":"connected"}"#);

        service
            .update(&id, &created.edit_token, vec![ItemInput::new("x")], "editor")
            .await
            .unwrap();

        assert!(editor_rx.try_recv().is_err());
        let frame: serde_json::Value =
            serde_json::from_str(&viewer_rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "update");
        assert_eq!(frame["updated_by"], "editor");
        assert_eq!(frame["todo_list"]["items"][0]["content"], "x");
        assert!(viewer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_reports_whether_anything_was_removed() {
        let service = service();
        let (first, _rx1) = Connection::new("s", "doc");
        let (second, _rx2) = Connection::new("s", "doc");
        service.join(first.clone()).await.unwrap();
        service.join(second.clone()).await.unwrap();

        assert!(!service.leave_connection(&first).await);
        assert!(service.leave_connection(&second).await);
        assert!(!service.leave("s").await);
    }

    #[tokio::test]
    async fn test_join_when_disabled_is_unavailable() {
        let service = TodoService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ConnectionRegistry::new(false)),
            24,
        );
        let (c, _rx) = Connection::new("s", "doc");
        assert!(matches!(service.join(c).await, Err(Error::FeatureUnavailable)));
    }

    #[tokio::test]
    async fn test_update_succeeds_when_broadcast_fails() {
        let service = service();
        let created = service.create(1, Vec::new()).await.unwrap();
        let id = created.todo_list.id.clone();

        let (viewer, viewer_rx) = Connection::new("viewer", id.clone());
        service.join(viewer).await.unwrap();
        drop(viewer_rx);

        let result = service
            .update(&id, &created.edit_token, vec![ItemInput::new("x")], "editor")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost_silently() {
        let service = Arc::new(service());
        let created = service.create(1, Vec::new()).await.unwrap();
        let id = created.todo_list.id.clone();

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = service.clone();
            let id = id.clone();
            let token = created.edit_token.clone();
            handles.push(tokio::spawn(async move {
                service
                    .update(&id, &token, vec![ItemInput::new(format!("{i}"))], "s")
                    .await
            }));
        }

        let mut written = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => written += 1,
                Err(Error::Conflict) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        // Every successful write bumped the version exactly once
        let final_list = service.get(&id).await.unwrap();
        assert_eq!(final_list.version, written);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_keeps_live_lists() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let short = service.create(1, Vec::new()).await.unwrap().todo_list;
        let long = service.create(48, Vec::new()).await.unwrap().todo_list;

        tokio::time::advance(std::time::Duration::from_secs(2 * 3600)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(matches!(service.get(&short.id).await, Err(Error::NotFound)));
        assert!(service.get(&long.id).await.is_ok());
    }

    #[test]
    fn test_stored_version() {
        assert_eq!(stored_version(br#"{"version":4,"id":"x"}"#), Some(4));
        assert_eq!(stored_version(br#"{"id":"x"}"#), Some(0));
        assert_eq!(stored_version(b"garbage"), None);
    }
}
