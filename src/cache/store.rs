//! Order Cache Module
//!
//! Bounded in-memory map of order id to [`Order`] in front of the durable
//! store, with random eviction and a durable membership mirror (the `Hash`
//! table) used to rebuild the key set after a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheCounters, CacheStats, RandomKeySet};
use crate::error::{OrderError, Result};
use crate::models::Order;
use crate::storage::OrderRepository;

/// Map and key set, always mutated together under one lock.
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Order>,
    keys: RandomKeySet,
}

impl CacheState {
    fn insert(&mut self, id: String, order: Order) {
        self.keys.insert(&id);
        self.entries.insert(id, order);
    }

    fn evict_random(&mut self) -> Option<String> {
        let key = self.keys.take_random(&mut rand::rng())?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Store reads in flight for one id, plus any newer version written meanwhile.
#[derive(Debug, Default)]
struct PendingLoad {
    readers: usize,
    newer: Option<Order>,
}

type PendingLoads = Mutex<HashMap<String, PendingLoad>>;

fn lock_pending(pending: &PendingLoads) -> MutexGuard<'_, HashMap<String, PendingLoad>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registration of one miss while it reads the store. Unregisters on drop,
/// including when the reading future is abandoned.
struct LoadGuard<'a> {
    pending: &'a PendingLoads,
    id: &'a str,
}

impl<'a> LoadGuard<'a> {
    fn register(pending: &'a PendingLoads, id: &'a str) -> Self {
        lock_pending(pending).entry(id.to_string()).or_default().readers += 1;
        Self { pending, id }
    }

    /// Version handed over by `refresh` while the read was in flight.
    fn newer(&self) -> Option<Order> {
        lock_pending(self.pending)
            .get(self.id)
            .and_then(|load| load.newer.clone())
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let mut pending = lock_pending(self.pending);
        if let Some(load) = pending.get_mut(self.id) {
            load.readers -= 1;
            if load.readers == 0 {
                pending.remove(self.id);
            }
        }
    }
}

// == Order Cache ==
/// Read-through cache of orders capped at `capacity` entries.
///
/// The in-memory map is authoritative for live reads. Index writes happen
/// under the same write lock as the membership change they mirror, so the
/// durable index follows membership in order. A failed index write is only
/// logged.
pub struct OrderCache {
    state: RwLock<CacheState>,
    pending: PendingLoads,
    store: Arc<dyn OrderRepository>,
    capacity: usize,
    counters: CacheCounters,
}

impl OrderCache {
    // == Constructor ==
    /// Creates an empty cache. A capacity of zero is treated as one.
    pub fn new(capacity: usize, store: Arc<dyn OrderRepository>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            pending: Mutex::new(HashMap::new()),
            store,
            capacity: capacity.max(1),
            counters: CacheCounters::default(),
        }
    }

    // == Get ==
    /// Returns the order for `id`, loading it from the store on a miss.
    ///
    /// `NotFound` and `Persistence` errors from the store are passed through;
    /// nothing is cached for them. A version written (and refreshed) while
    /// the store read was in flight wins over what the read returned.
    pub async fn get(&self, id: &str) -> Result<Order> {
        let cached = {
            let state = self.state.read().await;
            state.entries.get(id).cloned()
        };
        if let Some(order) = cached {
            self.counters.record_hit();
            return Ok(order);
        }

        self.counters.record_miss();
        debug!("Cache miss for {}, reading store", id);
        let load = LoadGuard::register(&self.pending, id);
        let loaded = self.store.get_order(id).await;

        let mut state = self.state.write().await;
        let order = match (loaded, load.newer()) {
            (Ok(_), Some(newer)) => {
                debug!("Order {} was rewritten during the miss, caching the newer version", id);
                newer
            }
            (Ok(order), None) => order,
            (Err(err), _) => return Err(err),
        };

        // Another miss for the same id may have filled the slot already
        if let Some(resident) = state.entries.get(id) {
            return Ok(resident.clone());
        }

        self.insert_locked(&mut state, id.to_string(), order.clone()).await;
        Ok(order)
    }

    // == Set ==
    /// Inserts or replaces `id`, evicting one random entry first when full.
    ///
    /// Eviction, insertion and the matching index writes all happen under the
    /// same write lock, so the map never holds more than `capacity` entries
    /// and the index never keeps an id whose eviction it already saw.
    pub async fn set(&self, id: String, order: Order) {
        let mut state = self.state.write().await;
        self.insert_locked(&mut state, id, order).await;
    }

    async fn insert_locked(&self, state: &mut CacheState, id: String, order: Order) {
        let evicted = if !state.entries.contains_key(&id) && state.entries.len() >= self.capacity {
            state.evict_random()
        } else {
            None
        };
        state.insert(id.clone(), order);

        if let Some(key) = evicted {
            self.counters.record_eviction();
            debug!("Evicted {} to make room for {}", key, id);
            self.forget_index(&key).await;
        }

        if let Err(err) = self.store.mark_cache_resident(&id).await {
            warn!("Failed to save {} to cache index: {}", id, err);
        }
    }

    // == Refresh ==
    /// Replaces a resident entry with a newer version.
    ///
    /// An absent id is not inserted, but a miss currently reading it from the
    /// store is handed this version. Returns false when neither applied.
    pub async fn refresh(&self, order: &Order) -> bool {
        let mut state = self.state.write().await;
        if let Some(entry) = state.entries.get_mut(&order.order_uid) {
            *entry = order.clone();
            return true;
        }

        match lock_pending(&self.pending).get_mut(&order.order_uid) {
            Some(load) => {
                load.newer = Some(order.clone());
                true
            }
            None => false,
        }
    }

    // == Restore ==
    /// Rebuilds the map from the durable index. Call once, before serving reads.
    ///
    /// Orders that fail to load are logged and skipped. Index rows whose order
    /// no longer exists, or that exceed the capacity, are removed from the index.
    /// Returns the number of orders restored.
    pub async fn restore(&self) -> Result<usize> {
        let ids = self.store.list_cache_resident_ids().await?;
        info!("Restoring cache from index: {} entries found", ids.len());

        let mut state = self.state.write().await;
        let mut restored = 0;

        for id in ids {
            if state.entries.contains_key(&id) {
                continue;
            }
            if state.entries.len() >= self.capacity {
                warn!("Cache index entry {} exceeds capacity {}, dropping it", id, self.capacity);
                self.forget_index(&id).await;
                continue;
            }

            match self.store.get_order(&id).await {
                Ok(order) => {
                    state.insert(id.clone(), order);
                    restored += 1;
                    debug!("Order {} restored to cache", id);
                }
                Err(OrderError::NotFound(_)) => {
                    warn!("Cache index entry {} has no order row, dropping it", id);
                    self.forget_index(&id).await;
                }
                Err(err) => {
                    warn!("Failed to restore order {}: {}", id, err);
                }
            }
        }

        info!("Cache restored with {} orders", restored);
        Ok(restored)
    }

    async fn forget_index(&self, id: &str) {
        match self.store.clear_cache_resident(id).await {
            Ok(()) => debug!("Removed {} from cache index", id),
            Err(OrderError::NotFound(_)) => {
                warn!("Cache index had no entry for {} (already removed)", id)
            }
            Err(err) => warn!("Failed to remove {} from cache index: {}", id, err),
        }
    }

    // == Accessors ==
    /// Returns the current number of resident orders.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Checks residency without touching the store or the counters.
    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.entries.contains_key(id)
    }

    /// Resident ids, sorted.
    pub async fn resident_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let total = self.len().await;
        self.counters.snapshot(total, self.capacity)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryOrderStore;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// Which store call [`GatedStore`] holds until a permit is released.
    enum Hold {
        /// `mark_cache_resident` for this id
        Mark(&'static str),
        /// `get_order`, after the row has been read
        Get,
    }

    /// Memory store that pauses one kind of call mid-flight.
    struct GatedStore {
        inner: MemoryOrderStore,
        hold: Hold,
        entered: Notify,
        gate: Semaphore,
    }

    impl GatedStore {
        fn new(hold: Hold) -> Self {
            Self {
                inner: MemoryOrderStore::new(),
                hold,
                entered: Notify::new(),
                gate: Semaphore::new(0),
            }
        }

        async fn pause(&self) {
            self.entered.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
    }

    #[async_trait::async_trait]
    impl OrderRepository for GatedStore {
        async fn upsert_order(&self, order: &Order) -> Result<()> {
            self.inner.upsert_order(order).await
        }

        async fn get_order(&self, id: &str) -> Result<Order> {
            let loaded = self.inner.get_order(id).await;
            if matches!(self.hold, Hold::Get) {
                self.pause().await;
            }
            loaded
        }

        async fn mark_cache_resident(&self, id: &str) -> Result<()> {
            if matches!(self.hold, Hold::Mark(held) if held == id) {
                self.pause().await;
            }
            self.inner.mark_cache_resident(id).await
        }

        async fn clear_cache_resident(&self, id: &str) -> Result<()> {
            self.inner.clear_cache_resident(id).await
        }

        async fn list_cache_resident_ids(&self) -> Result<Vec<String>> {
            self.inner.list_cache_resident_ids().await
        }
    }

    fn cache_with(capacity: usize) -> (OrderCache, Arc<MemoryOrderStore>) {
        let store = Arc::new(MemoryOrderStore::new());
        (OrderCache::new(capacity, store.clone()), store)
    }

    async fn index(store: &MemoryOrderStore) -> Vec<String> {
        store.list_cache_resident_ids().await.unwrap()
    }

    #[tokio::test]
    async fn test_cache_new() {
        let (cache, _) = cache_with(10);
        assert!(cache.is_empty().await);
        assert_eq!(cache.capacity(), 10);
    }

    #[tokio::test]
    async fn test_zero_capacity_treated_as_one() {
        let (cache, _) = cache_with(0);
        cache.set("a".to_string(), Order::sample("a")).await;
        cache.set("b".to_string(), Order::sample("b")).await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_random_eviction_capacity_two() {
        let (cache, store) = cache_with(2);

        for id in ["a", "b", "c"] {
            cache.set(id.to_string(), Order::sample(id)).await;
        }

        let resident = cache.resident_ids().await;
        assert_eq!(resident.len(), 2);
        assert!(resident.contains(&"c".to_string()));
        let survivors = ["a", "b"]
            .iter()
            .filter(|id| resident.contains(&id.to_string()))
            .count();
        assert_eq!(survivors, 1);

        // Index mirrors membership
        assert_eq!(index(&store).await, resident);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let (cache, _) = cache_with(2);
        cache.set("a".to_string(), Order::sample("a")).await;
        cache.set("b".to_string(), Order::sample("b")).await;

        let mut newer = Order::sample("a");
        newer.locale = "ru".to_string();
        cache.set("a".to_string(), newer).await;

        assert_eq!(cache.resident_ids().await, vec!["a", "b"]);
        assert_eq!(cache.get("a").await.unwrap().locale, "ru");
        assert_eq!(cache.stats().await.evictions, 0);
    }

    #[tokio::test]
    async fn test_get_miss_reads_store_and_caches() {
        let (cache, store) = cache_with(10);
        let order = Order::sample("u1");
        store.upsert_order(&order).await.unwrap();

        assert_eq!(cache.get("u1").await.unwrap(), order);
        assert!(cache.contains("u1").await);
        assert_eq!(index(&store).await, vec!["u1"]);

        // Second read is served from memory even if the store goes away
        store.set_available(false);
        assert_eq!(cache.get("u1").await.unwrap(), order);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_get_missing_propagates_not_found() {
        let (cache, _) = cache_with(10);
        assert!(matches!(
            cache.get("ghost").await,
            Err(OrderError::NotFound(_))
        ));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_store_failure_propagates() {
        let (cache, store) = cache_with(10);
        store.set_available(false);
        assert!(matches!(
            cache.get("u1").await,
            Err(OrderError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_index_failure_does_not_block_insert() {
        let (cache, store) = cache_with(10);
        store.set_available(false);

        cache.set("u1".to_string(), Order::sample("u1")).await;
        assert!(cache.contains("u1").await);

        store.set_available(true);
        assert!(index(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_only_touches_resident_entries() {
        let (cache, store) = cache_with(10);
        cache.set("u1".to_string(), Order::sample("u1")).await;

        let mut newer = Order::sample("u1");
        newer.customer_id = "someone".to_string();
        assert!(cache.refresh(&newer).await);
        assert_eq!(cache.get("u1").await.unwrap().customer_id, "someone");

        assert!(!cache.refresh(&Order::sample("u2")).await);
        assert!(!cache.contains("u2").await);
        assert_eq!(index(&store).await, vec!["u1"]);
    }

    #[tokio::test]
    async fn test_restore_exact_index() {
        let store = Arc::new(MemoryOrderStore::new());
        for id in ["u1", "u2", "u3"] {
            store.upsert_order(&Order::sample(id)).await.unwrap();
        }
        store.mark_cache_resident("u1").await.unwrap();
        store.mark_cache_resident("u3").await.unwrap();

        let cache = OrderCache::new(10, store.clone());
        assert_eq!(cache.restore().await.unwrap(), 2);
        assert_eq!(cache.resident_ids().await, vec!["u1", "u3"]);
        assert_eq!(cache.get("u3").await.unwrap(), Order::sample("u3"));
    }

    #[tokio::test]
    async fn test_restore_skips_missing_rows() {
        let store = Arc::new(MemoryOrderStore::new());
        store.upsert_order(&Order::sample("u1")).await.unwrap();
        store.mark_cache_resident("u1").await.unwrap();
        store.mark_cache_resident("gone").await.unwrap();

        let cache = OrderCache::new(10, store.clone());
        assert_eq!(cache.restore().await.unwrap(), 1);
        assert_eq!(cache.resident_ids().await, vec!["u1"]);
        assert_eq!(index(&store).await, vec!["u1"]);
    }

    #[tokio::test]
    async fn test_restore_never_brings_back_evicted_key() {
        let store = Arc::new(MemoryOrderStore::new());
        for id in ["a", "b", "c"] {
            store.upsert_order(&Order::sample(id)).await.unwrap();
        }

        let cache = OrderCache::new(2, store.clone());
        for id in ["a", "b", "c"] {
            cache.get(id).await.unwrap();
        }
        let before_restart = cache.resident_ids().await;

        let restarted = OrderCache::new(2, store.clone());
        restarted.restore().await.unwrap();
        assert_eq!(restarted.resident_ids().await, before_restart);
    }

    #[tokio::test]
    async fn test_restore_respects_capacity() {
        let store = Arc::new(MemoryOrderStore::new());
        for id in ["a", "b", "c"] {
            store.upsert_order(&Order::sample(id)).await.unwrap();
            store.mark_cache_resident(id).await.unwrap();
        }

        let cache = OrderCache::new(2, store.clone());
        assert_eq!(cache.restore().await.unwrap(), 2);
        assert_eq!(cache.len().await, 2);
        assert_eq!(index(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_fails_when_index_unreadable() {
        let (cache, store) = cache_with(10);
        store.set_available(false);
        assert!(cache.restore().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_respect_capacity() {
        let (cache, _) = cache_with(5);
        let cache = Arc::new(cache);

        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    let id = format!("t{}-{}", task, i);
                    cache.set(id.clone(), Order::sample(id)).await;
                    assert!(cache.len().await <= 5);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len().await, 5);
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_index_write_cannot_outlive_eviction() {
        let store = Arc::new(GatedStore::new(Hold::Mark("a")));
        let cache = Arc::new(OrderCache::new(1, store.clone()));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.set("a".to_string(), Order::sample("a")).await })
        };
        store.entered.notified().await;

        // "b" must wait for the index write of "a" before it can evict it
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.set("b".to_string(), Order::sample("b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        store.gate.add_permits(1);
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(cache.resident_ids().await, vec!["b"]);
        assert_eq!(store.list_cache_resident_ids().await.unwrap(), vec!["b"]);

        for id in ["a", "b"] {
            store.inner.upsert_order(&Order::sample(id)).await.unwrap();
        }
        let restarted = OrderCache::new(1, store.clone());
        restarted.restore().await.unwrap();
        assert_eq!(restarted.resident_ids().await, vec!["b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_during_miss_is_not_shadowed_by_older_read() {
        let store = Arc::new(GatedStore::new(Hold::Get));
        store.inner.upsert_order(&Order::sample("u1")).await.unwrap();
        let cache = Arc::new(OrderCache::new(4, store.clone()));

        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("u1").await })
        };
        // The miss has read the old row and is paused before caching it
        store.entered.notified().await;

        let mut newer = Order::sample("u1");
        newer.delivery_service = "dhl".to_string();
        store.inner.upsert_order(&newer).await.unwrap();
        assert!(cache.refresh(&newer).await);

        store.gate.add_permits(1);
        assert_eq!(reader.await.unwrap().unwrap(), newer);
        assert_eq!(cache.get("u1").await.unwrap().delivery_service, "dhl");
    }

    #[tokio::test]
    async fn test_refresh_without_pending_miss_is_dropped() {
        let (cache, _) = cache_with(4);
        let order = Order::sample("u1");

        assert!(!cache.refresh(&order).await);
        assert!(lock_pending(&cache.pending).is_empty());
        assert!(!cache.contains("u1").await);
    }

    #[tokio::test]
    async fn test_failed_miss_leaves_no_pending_entry() {
        let (cache, _) = cache_with(4);
        assert!(cache.get("ghost").await.is_err());
        assert!(lock_pending(&cache.pending).is_empty());
    }
}
