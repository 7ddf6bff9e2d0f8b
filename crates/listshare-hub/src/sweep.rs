//! Periodic expiry sweep
//!
//! The store already hides expired lists from reads, so this is housekeeping
//! only: it reclaims the memory held by lists nobody can see any more.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::SharedStore;

/// Run one sweep. Returns how many expired lists were removed.
pub async fn sweep_once(store: &SharedStore) -> usize {
    match store.purge_expired().await {
        Ok(0) => {
            debug!("Expiry sweep found nothing to remove");
            0
        }
        Ok(removed) => {
            info!(removed, "Expiry sweep removed expired todo lists");
            removed
        }
        Err(e) => {
            warn!(error = %e, "Expiry sweep failed");
            0
        }
    }
}

/// Spawn a background task sweeping every `interval`.
///
/// The first sweep happens one full interval after spawning. The task runs
/// until aborted through the returned handle.
pub fn spawn_sweeper(store: SharedStore, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "Expiry sweeper started");
        loop {
            ticker.tick().await;
            sweep_once(&store).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_on_schedule() {
        let memory = Arc::new(MemoryStore::new());
        let store: SharedStore = memory.clone();
        store
            .set_with_expiry("todo:a", b"{}".to_vec(), Duration::from_secs(30))
            .await
            .unwrap();

        let handle = spawn_sweeper(store, Duration::from_secs(60));

        // Let the entry expire, but stay before the first tick
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(memory.len().await, 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(memory.len().await, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_once_keeps_live_entries() {
        let memory = Arc::new(MemoryStore::new());
        let store: SharedStore = memory.clone();
        store
            .set_with_expiry("todo:a", b"{}".to_vec(), Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(sweep_once(&store).await, 0);
        assert_eq!(memory.len().await, 1);
    }
}
