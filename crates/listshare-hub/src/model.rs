//! Todo list data model
//!
//! A [`TodoList`] is stored as JSON under `todo:<id>`. The stored form carries
//! the edit-token digest and a write version; neither is ever shown to
//! clients, which only see [`PublicTodoList`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single to-do entry as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Unique within the owning list, always assigned by the server
    pub id: String,

    pub content: String,

    pub completed: bool,

    /// Zero-based position of the item in its list
    pub order: usize,

    /// Immutable once set
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// An item as submitted by a client.
///
/// Has no `order` or `created_at`; values a client sends for either are
/// dropped during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemInput {
    /// Id of an existing item, or empty/absent for a new one
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ItemInput {
    /// Create an input for a brand new item with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Create an input that refers to an existing item.
    pub fn existing(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            content: content.into(),
            ..Self::default()
        }
    }

    /// The claimed id, treating an empty string like an absent one.
    pub fn claimed_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A todo list as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
    pub id: String,

    pub items: Vec<TodoItem>,

    pub created_at: DateTime<Utc>,

    /// Always later than `created_at`
    pub expires_at: DateTime<Utc>,

    /// Hex-encoded SHA-256 of the edit token. The raw token is never stored.
    pub edit_token_hash: String,

    /// Incremented on every persisted update
    #[serde(default)]
    pub version: u64,
}

impl TodoList {
    /// Borrow the client-facing view of this list.
    pub fn public(&self) -> PublicTodoList<'_> {
        PublicTodoList {
            id: &self.id,
            items: &self.items,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    /// Time left before the list expires, or `None` if it already has.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// What clients see of a todo list: everything except the token digest and
/// the write version.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PublicTodoList<'a> {
    pub id: &'a str,
    pub items: &'a [TodoItem],
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Body of `POST /api/v1/todos`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTodoListRequest {
    #[serde(default)]
    pub expiration_hours: i64,

    #[serde(default)]
    pub items: Vec<ItemInput>,
}

/// Body of `PUT /api/v1/todos/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTodoListRequest {
    #[serde(default)]
    pub items: Vec<ItemInput>,
}
