use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::order::Order;
use super::OrderCache;

// ============================================================================
// Sliding-TTL Order Cache
// ============================================================================
//
// Every `get` hit resets the entry's idle clock. A single background sweep
// wakes every `ttl / 2` and drops entries idle for longer than `ttl`.
//
// One RwLock guards the map. `get` takes the write half because it touches
// the idle timestamp, and the sweep holds the write half for its whole scan,
// so a sweep blocks every reader and writer while it runs. There is no
// capacity bound.
//
// ============================================================================

struct CacheEntry {
    order: Order,
    last_access: Instant,
}

pub struct TtlCache {
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub async fn contains(&self, id: Uuid) -> bool {
        self.entries.read().await.contains_key(&id)
    }

    /// Drop every entry idle for longer than the TTL. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.last_access.elapsed() <= ttl);
        before - entries.len()
    }

    /// Spawn the eviction task. It stops at the first tick boundary after
    /// `shutdown` is cancelled.
    pub fn start_deleting(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = (self.ttl / 2).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(ttl_ms = cache.ttl.as_millis() as u64, "Cache eviction started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.sweep().await;
                        if evicted > 0 {
                            tracing::debug!(evicted = evicted, "Evicted idle cache entries");
                        }
                    }
                }
            }

            tracing::info!("Cache eviction stopped");
        })
    }
}

#[async_trait]
impl OrderCache for TtlCache {
    async fn set(&self, id: Uuid, order: Order) {
        let entry = CacheEntry {
            order,
            last_access: Instant::now(),
        };
        self.entries.write().await.insert(id, entry);
    }

    async fn get(&self, id: Uuid) -> Option<Order> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id)?;
        entry.last_access = Instant::now();
        Some(entry.order.clone())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::aggregate::tests::sample_order;

    #[tokio::test]
    async fn test_get_miss() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_returns_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        let order = sample_order(id);

        cache.set(id, order.clone()).await;

        assert_eq!(cache.get(id).await, Some(order));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        let mut order = sample_order(id);

        cache.set(id, order.clone()).await;
        order.track_number = "NEW".to_string();
        cache.set(id, order).await;

        assert_eq!(cache.get(id).await.unwrap().track_number, "NEW");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_returns_a_copy() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.set(id, sample_order(id)).await;

        let mut copy = cache.get(id).await.unwrap();
        copy.items.clear();

        assert_eq!(cache.get(id).await.unwrap().items.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_entry_is_evicted() {
        let ttl = Duration::from_millis(60);
        let cache = Arc::new(TtlCache::new(ttl));
        let shutdown = CancellationToken::new();
        let handle = cache.start_deleting(shutdown.clone());

        let id = Uuid::new_v4();
        cache.set(id, sample_order(id)).await;

        tokio::time::sleep(ttl / 2).await;
        assert!(cache.get(id).await.is_some(), "expected hit before expiration");

        // Idle since the hit; the sweep at 1.5x TTL after it removes the entry.
        tokio::time::sleep(ttl + ttl / 2 + Duration::from_millis(10)).await;
        assert!(!cache.contains(id).await, "expected entry to expire");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_accessed_entry_survives() {
        let ttl = Duration::from_millis(60);
        let cache = Arc::new(TtlCache::new(ttl));
        let shutdown = CancellationToken::new();
        let handle = cache.start_deleting(shutdown.clone());

        let id = Uuid::new_v4();
        cache.set(id, sample_order(id)).await;

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(cache.get(id).await.is_some());
        }

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_only_removes_idle_entries() {
        let ttl = Duration::from_millis(100);
        let cache = TtlCache::new(ttl);
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        cache.set(stale, sample_order(stale)).await;
        tokio::time::advance(Duration::from_millis(80)).await;
        cache.set(fresh, sample_order(fresh)).await;
        tokio::time::advance(Duration::from_millis(40)).await;

        assert_eq!(cache.sweep().await, 1);
        assert!(!cache.contains(stale).await);
        assert!(cache.contains(fresh).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task_stops_on_cancel() {
        let cache = Arc::new(TtlCache::new(Duration::from_millis(50)));
        let shutdown = CancellationToken::new();
        let handle = cache.start_deleting(shutdown.clone());

        shutdown.cancel();

        tokio::time::timeout(Duration::from_millis(10), handle)
            .await
            .expect("eviction task should stop promptly")
            .unwrap();
    }
}
