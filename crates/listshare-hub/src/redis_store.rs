//! Redis-backed document store
//!
//! Lists are stored as `SET todo:<id> <json> PX <ttl>`, so expiry is handled
//! by Redis itself and several hub processes can share one store.
//!
//! Conditional writes run a small Lua script that swaps the value only if
//! the bytes stored under the key are still exactly the bytes the version was
//! read from.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo, Script};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{ConditionalWrite, DocumentStore, VersionOf};

/// KEYS[1] = key, ARGV[1] = bytes read, ARGV[2] = new bytes, ARGV[3] = ttl ms
const COMPARE_AND_SET: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
";

fn store_error(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

/// Accept both `redis://host:port` and the bare `host:port` form.
pub fn normalize_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("redis://{url}")
    }
}

/// Expiry in whole milliseconds, never rounded down to zero.
fn ttl_millis(ttl: Duration) -> Result<u64> {
    if ttl.is_zero() {
        return Err(Error::Store("expiry must be positive".to_string()));
    }
    let millis = u64::try_from(ttl.as_millis())
        .map_err(|_| Error::Store("expiry is out of range".to_string()))?;
    Ok(millis.max(1))
}

/// Document store on a shared, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    compare_and_set: Script,
}

impl RedisStore {
    /// Connect to Redis. `password`, when given, overrides any password in
    /// the URL.
    pub async fn connect(url: &str, password: Option<&str>) -> Result<Self> {
        let mut info = normalize_url(url)
            .into_connection_info()
            .map_err(store_error)?;
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            info.redis.password = Some(password.to_string());
        }

        let client = redis::Client::open(info).map_err(store_error)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(store_error)?;

        info!(url = %url, "Connected to Redis");

        Ok(Self {
            connection,
            compare_and_set: Script::new(COMPARE_AND_SET),
        })
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut connection = self.connection.clone();
        connection.get(key).await.map_err(store_error)
    }

    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let millis = ttl_millis(ttl)?;
        let mut connection = self.connection.clone();
        connection
            .pset_ex::<_, _, ()>(key, value, millis)
            .await
            .map_err(store_error)?;
        debug!(key = %key, ttl_ms = millis, "Stored value");
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
        let millis = ttl_millis(ttl)?;
        let Some(current) = self.get(key).await? else {
            return Ok(ConditionalWrite::VersionMismatch);
        };

        let current_version = version_of(&current);
        if current_version != Some(expected_version) {
            debug!(key = %key, expected_version, ?current_version, "Conditional write rejected");
            return Ok(ConditionalWrite::VersionMismatch);
        }

        let mut connection = self.connection.clone();
        let swapped: i64 = self
            .compare_and_set
            .key(key)
            .arg(current)
            .arg(value)
            .arg(millis)
            .invoke_async(&mut connection)
            .await
            .map_err(store_error)?;

        if swapped == 1 {
            Ok(ConditionalWrite::Written)
        } else {
            debug!(key = %key, "Value changed between read and swap");
            Ok(ConditionalWrite::VersionMismatch)
        }
    }

    /// Redis expires keys on its own; there is never anything to sweep.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
