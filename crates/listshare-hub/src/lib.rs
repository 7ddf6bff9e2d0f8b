//! listshare-hub: ephemeral shareable todo lists with live updates
//!
//! This crate provides:
//! - Todo lists that expire after a configurable time-to-live
//! - Possession-token authorization of edits (no accounts)
//! - Whole-list update reconciliation that preserves item identity
//! - WebSocket fan-out of changes to every other viewer of a list
//! - REST API for list operations

pub mod context;
pub mod error;
pub mod model;
pub mod protocol;
pub mod reconcile;
pub mod redis_store;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod sweep;
pub mod token;

pub use context::HubContext;
pub use error::{Error, Result};
pub use model::{ItemInput, TodoItem, TodoList};
pub use redis_store::RedisStore;
pub use registry::{Connection, ConnectionRegistry};
pub use service::TodoService;
pub use store::{DocumentStore, MemoryStore};
