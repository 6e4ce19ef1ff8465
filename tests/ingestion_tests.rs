//! End-to-end ingestion tests
//!
//! Runs pipelines and write loops against the in-memory stream and store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use order_cache::{
    cache::OrderCache,
    error::{OrderError, Result},
    ingest::{spawn_ingestion, MemoryStream, MessageStream, PipelineSettings, StreamMessage},
    models::Order,
    storage::{MemoryOrderStore, OrderRepository},
};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

// == Helper Functions ==

fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        poll_interval: Duration::from_millis(2),
        write_retries: 0,
    }
}

/// Polls `condition` for up to two seconds.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn streams_of(streams: &[Arc<MemoryStream>]) -> Vec<Arc<dyn MessageStream>> {
    streams
        .iter()
        .map(|stream| stream.clone() as Arc<dyn MessageStream>)
        .collect()
}

/// Holds every write until a permit is released.
struct GatedStore {
    inner: MemoryOrderStore,
    entered: Notify,
    gate: Semaphore,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemoryOrderStore::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl OrderRepository for GatedStore {
    async fn upsert_order(&self, order: &Order) -> Result<()> {
        self.entered.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| OrderError::Internal(e.to_string()))?;
        permit.forget();
        self.inner.upsert_order(order).await
    }

    async fn get_order(&self, id: &str) -> Result<Order> {
        self.inner.get_order(id).await
    }

    async fn mark_cache_resident(&self, id: &str) -> Result<()> {
        self.inner.mark_cache_resident(id).await
    }

    async fn clear_cache_resident(&self, id: &str) -> Result<()> {
        self.inner.clear_cache_resident(id).await
    }

    async fn list_cache_resident_ids(&self) -> Result<Vec<String>> {
        self.inner.list_cache_resident_ids().await
    }
}

// == Happy Path ==

#[tokio::test]
async fn test_orders_stored_and_committed_in_fetch_order() {
    let stream = Arc::new(MemoryStream::new("order-info"));
    let store = Arc::new(MemoryOrderStore::new());
    let positions: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| stream.push_order(&Order::sample(*id)))
        .collect();

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&[stream.clone()]),
        store.clone(),
        None,
        fast_settings(),
        cancel.clone(),
    );

    assert!(eventually(|| stream.committed().len() == 4).await);
    cancel.cancel();
    handle.join().await;

    assert_eq!(stream.committed(), positions);
    for id in ["a", "b", "c", "d"] {
        assert_eq!(store.get_order(id).await.unwrap(), Order::sample(id));
    }
}

#[tokio::test]
async fn test_invalid_messages_skipped_but_committed() {
    let stream = Arc::new(MemoryStream::new("order-info"));
    let store = Arc::new(MemoryOrderStore::new());

    let mut mismatched = Order::sample("bad");
    mismatched.items[0].track_number = "OTHER".to_string();
    let mut no_payment = Order::sample("nopay");
    no_payment.payment.transaction.clear();

    stream.push_order(&Order::sample("good1"));
    stream.push(Some("junk"), b"{ not json".to_vec());
    stream.push_order(&mismatched);
    stream.push_order(&no_payment);
    stream.push_order(&Order::sample("good2"));

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&[stream.clone()]),
        store.clone(),
        None,
        fast_settings(),
        cancel.clone(),
    );

    assert!(eventually(|| stream.committed().len() == 5).await);
    cancel.cancel();
    handle.join().await;

    assert_eq!(store.order_count(), 2);
    assert_eq!(store.write_count(), 2);
    assert!(matches!(
        store.get_order("bad").await,
        Err(OrderError::NotFound(_))
    ));
}

// == Store Outage ==

#[tokio::test]
async fn test_store_outage_commits_and_loses_messages() {
    let stream = Arc::new(MemoryStream::new("order-info"));
    let store = Arc::new(MemoryOrderStore::new());
    store.set_available(false);

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&[stream.clone()]),
        store.clone(),
        None,
        fast_settings(),
        cancel.clone(),
    );

    stream.push_order(&Order::sample("lost"));
    assert!(eventually(|| stream.committed().len() == 1).await);

    store.set_available(true);
    stream.push_order(&Order::sample("kept"));
    assert!(eventually(|| stream.committed().len() == 2).await);

    cancel.cancel();
    handle.join().await;

    assert!(store.get_order("kept").await.is_ok());
    assert!(matches!(
        store.get_order("lost").await,
        Err(OrderError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_write_retries_ride_out_short_outage() {
    let stream = Arc::new(MemoryStream::new("order-info"));
    let store = Arc::new(MemoryOrderStore::new());
    let settings = PipelineSettings {
        poll_interval: Duration::from_millis(2),
        write_retries: 1_000,
    };
    store.set_available(false);

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&[stream.clone()]),
        store.clone(),
        None,
        settings,
        cancel.clone(),
    );

    stream.push_order(&Order::sample("u1"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(stream.committed().is_empty());

    store.set_available(true);
    assert!(eventually(|| stream.committed().len() == 1).await);
    cancel.cancel();
    handle.join().await;

    assert_eq!(store.get_order("u1").await.unwrap(), Order::sample("u1"));
}

// == Cancellation ==

#[tokio::test]
async fn test_cancel_mid_write_leaves_message_uncommitted() {
    let stream = Arc::new(MemoryStream::new("order-info"));
    let store = Arc::new(GatedStore::new());
    let order = Order::sample("u1");
    let position = stream.push_order(&order);

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&[stream.clone()]),
        store.clone(),
        None,
        fast_settings(),
        cancel.clone(),
    );

    // The write is in flight: cancel before it can answer
    store.entered.notified().await;
    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.gate.add_permits(1);
    handle.join().await;

    assert!(stream.committed().is_empty());

    // After a restart the broker hands the same message out again
    stream.redeliver(StreamMessage {
        key: Some(order.order_uid.clone()),
        payload: serde_json::to_vec(&order).unwrap(),
        position: position.clone(),
    });
    store.gate.add_permits(1);

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&[stream.clone()]),
        store.clone(),
        None,
        fast_settings(),
        cancel.clone(),
    );
    assert!(eventually(|| stream.committed().len() == 1).await);
    cancel.cancel();
    handle.join().await;

    assert_eq!(stream.committed(), vec![position]);
    assert_eq!(store.get_order("u1").await.unwrap(), order);
    assert_eq!(store.inner.order_count(), 1);
}

#[tokio::test]
async fn test_idle_pipelines_stop_on_cancel() {
    let streams = vec![
        Arc::new(MemoryStream::new("order-info")),
        Arc::new(MemoryStream::new("order-info")),
    ];
    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&streams),
        Arc::new(MemoryOrderStore::new()),
        None,
        fast_settings(),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .unwrap();
}

// == Multiple Consumers ==

#[tokio::test]
async fn test_multiple_consumers_share_one_store() {
    let streams: Vec<_> = (0..3)
        .map(|_| Arc::new(MemoryStream::new("order-info")))
        .collect();
    for (index, stream) in streams.iter().enumerate() {
        for n in 0..5 {
            stream.push_order(&Order::sample(format!("c{}-{}", index, n)));
        }
    }
    // One consumer is stuck on a broken broker connection
    streams[2].fail_next_fetches(3);

    let store = Arc::new(MemoryOrderStore::new());
    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&streams),
        store.clone(),
        None,
        fast_settings(),
        cancel.clone(),
    );

    assert!(eventually(|| streams.iter().all(|s| s.committed().len() == 5)).await);
    cancel.cancel();
    handle.join().await;

    assert_eq!(store.order_count(), 15);
}

// == Cache Interaction ==

#[tokio::test]
async fn test_ingestion_refreshes_cache_and_index_survives_restart() {
    let stream = Arc::new(MemoryStream::new("order-info"));
    let store = Arc::new(MemoryOrderStore::new());
    let cache = Arc::new(OrderCache::new(2, store.clone()));

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion(
        streams_of(&[stream.clone()]),
        store.clone(),
        Some(cache.clone()),
        fast_settings(),
        cancel.clone(),
    );

    stream.push_order(&Order::sample("u1"));
    stream.push_order(&Order::sample("u2"));
    assert!(eventually(|| stream.committed().len() == 2).await);

    // Ingestion alone does not populate the cache
    assert!(cache.is_empty().await);
    cache.get("u1").await.unwrap();

    let mut updated = Order::sample("u1");
    updated.delivery_service = "dhl".to_string();
    stream.push_order(&updated);
    assert!(eventually(|| stream.committed().len() == 3).await);

    cancel.cancel();
    handle.join().await;

    assert_eq!(cache.get("u1").await.unwrap().delivery_service, "dhl");
    assert!(!cache.contains("u2").await);

    let restarted = OrderCache::new(2, store.clone());
    assert_eq!(restarted.restore().await.unwrap(), 1);
    assert_eq!(restarted.resident_ids().await, vec!["u1".to_string()]);
    assert_eq!(restarted.get("u1").await.unwrap(), updated);
}
