//! Update reconciliation
//!
//! Authorizes a whole-list replacement against the stored edit-token digest
//! and merges the incoming items into the stored list:
//!
//! - items whose id matches a stored item keep their original `created_at`
//! - items with an empty or unknown id get a fresh id and `created_at = now`
//! - `order` is always the item's position in the new sequence
//!
//! Everything here is synchronous and free of I/O; the caller persists the
//! result and triggers the broadcast.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ItemInput, TodoItem, TodoList};
use crate::token;

/// Reconcile a replacement item list against a stored todo list.
///
/// Returns `Error::Unauthorized` without touching anything when the claimed
/// token does not match the stored digest. On success the list id,
/// timestamps and token digest are carried over unchanged.
pub fn reconcile(
    stored: &TodoList,
    claimed_token: &str,
    new_items: Vec<ItemInput>,
    now: DateTime<Utc>,
) -> Result<TodoList> {
    if !token::verify(claimed_token, &stored.edit_token_hash) {
        return Err(Error::Unauthorized);
    }

    let existing: HashMap<&str, &TodoItem> = stored
        .items
        .iter()
        .map(|item| (item.id.as_str(), item))
        .collect();

    Ok(TodoList {
        items: stamp_items(new_items, &existing, now),
        ..stored.clone()
    })
}

/// Turn client inputs into stored items.
///
/// `existing` maps ids of items already stored to the stored item. A list
/// being created passes an empty map, so every item is stamped as new.
///
/// An id may only be claimed once per list: a repeated id is treated as a
/// new item so ids stay unique within the list.
pub fn stamp_items(
    inputs: Vec<ItemInput>,
    existing: &HashMap<&str, &TodoItem>,
    now: DateTime<Utc>,
) -> Vec<TodoItem> {
    let mut claimed: HashSet<String> = HashSet::with_capacity(inputs.len());

    inputs
        .into_iter()
        .enumerate()
        .map(|(order, input)| {
            let known = input
                .claimed_id()
                .and_then(|id| existing.get(id).copied())
                .filter(|item| !claimed.contains(&item.id));

            let (id, created_at) = match known {
                Some(item) => (item.id.clone(), item.created_at),
                None => (Uuid::new_v4().to_string(), now),
            };
            claimed.insert(id.clone());

            TodoItem {
                id,
                content: input.content,
                completed: input.completed,
                order,
                created_at,
                completed_at: input.completed_at,
            }
        })
        .collect()
}
