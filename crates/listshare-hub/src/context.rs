//! Hub context - shared state for the server
//!
//! Contains the todo service, which in turn owns the store and the
//! connection registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::error::Result;
use crate::redis_store::RedisStore;
use crate::registry::ConnectionRegistry;
use crate::service::{DEFAULT_EXPIRATION_HOURS, TodoService};
use crate::store::{MemoryStore, SharedStore};
use crate::sweep::spawn_sweeper;

/// Configuration for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Enable live updates over WebSocket.
    /// When disabled, upgrade attempts are rejected and no broadcasts happen.
    /// Default: true.
    pub websocket_enabled: bool,

    /// Lifetime of a list whose creator asked for zero or negative hours.
    /// Default: 24.
    pub default_expiration_hours: i64,

    /// Expiry sweep interval in seconds.
    /// Set to None to disable the sweep.
    /// Default: one hour.
    pub sweep_interval_secs: Option<u64>,

    /// Redis connection URL.
    /// When None, lists live in process memory and vanish on restart.
    pub redis_url: Option<String>,

    /// Redis password, overriding any password in `redis_url`.
    pub redis_password: Option<String>,
}

impl HubConfig {
    /// Name of the configured storage backend.
    pub fn storage_kind(&self) -> &'static str {
        if self.redis_url.is_some() {
            "redis"
        } else {
            "memory"
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            websocket_enabled: true,
            default_expiration_hours: DEFAULT_EXPIRATION_HOURS,
            sweep_interval_secs: Some(3600),
            redis_url: None,
            redis_password: None,
        }
    }
}

/// Shared context for the hub server.
///
/// This is wrapped in `Arc` and shared across all request handlers.
pub struct HubContext {
    config: HubConfig,

    service: TodoService,

    /// Background expiry sweep, aborted when the context is dropped
    sweeper: Option<JoinHandle<()>>,
}

impl HubContext {
    /// Create a context backed by a fresh in-memory store.
    pub fn new(config: HubConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Create a context on the store named by the configuration: Redis when
    /// `redis_url` is set, process memory otherwise.
    pub async fn connect(config: HubConfig) -> Result<Self> {
        let Some(url) = config.redis_url.as_deref() else {
            info!("Using in-memory store");
            return Ok(Self::new(config));
        };

        let store = RedisStore::connect(url, config.redis_password.as_deref()).await?;
        // Redis expires keys itself
        let config = HubConfig {
            sweep_interval_secs: None,
            ..config
        };
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create a context backed by the given store.
    ///
    /// Must be called inside a tokio runtime when the sweep is enabled.
    pub fn with_store(config: HubConfig, store: SharedStore) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.websocket_enabled));
        let service = TodoService::new(store.clone(), registry, config.default_expiration_hours);

        let sweeper = config
            .sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(|secs| spawn_sweeper(store, Duration::from_secs(secs)));
        if sweeper.is_none() {
            info!("Expiry sweep disabled");
        }

        Self {
            config,
            service,
            sweeper,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Get reference to the todo service.
    pub fn service(&self) -> &TodoService {
        &self.service
    }

    /// Get reference to the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        self.service.registry()
    }
}

impl Drop for HubContext {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Type alias for the shared context used in axum handlers.
pub type SharedContext = Arc<HubContext>;
