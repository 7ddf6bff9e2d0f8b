//! Document store
//!
//! [`DocumentStore`] is the keyed store with per-key expiry that todo lists
//! live in. Keys are namespaced as `todo:<id>`. A missing or expired key is
//! reported as `Ok(None)`, distinct from a store failure.
//!
//! [`MemoryStore`] is the in-process implementation used by the server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

/// Prefix for todo list keys.
pub const KEY_PREFIX: &str = "todo:";

/// Build the store key for a todo list id.
pub fn todo_key(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Extracts the write version from a stored value.
pub type VersionOf = fn(&[u8]) -> Option<u64>;

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalWrite {
    /// The expected version matched and the value was written
    Written,
    /// The stored version differed (or the key vanished); nothing was written
    VersionMismatch,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Unconditionally store `value` under `key`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Store `value` under `key` only if the value currently stored there
    /// still carries `expected_version`.
    ///
    /// `version_of` extracts the version from a stored value; the store
    /// itself treats values as opaque bytes.
    async fn set_if_version(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        expected_version: u64,
        version_of: VersionOf,
    ) -> Result<ConditionalWrite>;

    /// Remove every entry whose expiry has passed. Returns how many were
    /// removed. Never touches live entries.
    async fn purge_expired(&self) -> Result<usize>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

/// In-memory TTL store.
///
/// Expired entries are invisible to reads immediately and are physically
/// removed by [`DocumentStore::purge_expired`] or when overwritten.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries physically held, live or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn deadline_for(ttl: Duration) -> Result<Instant> {
    if ttl.is_zero() {
        return Err(Error::Store("expiry must be positive".to_string()));
    }
    Instant::now()
        .checked_add(ttl)
        .ok_or_else(|| Error::Store("expiry is out of range".to_string()))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let deadline = deadline_for(ttl)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, deadline });
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Stored value");
        Ok(())
    }

    async fn set_if_version(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        expected_version: u64,
        version_of: VersionOf,
    ) -> Result<ConditionalWrite> {
        let deadline = deadline_for(ttl)?;
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let current = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| version_of(&entry.value));

        if current != Some(expected_version) {
            debug!(key = %key, expected_version, ?current, "Conditional write rejected");
            return Ok(ConditionalWrite::VersionMismatch);
        }

        entries.insert(key.to_string(), Entry { value, deadline });
        Ok(ConditionalWrite::Written)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}
