//! In-process order store
//!
//! Mirrors the relational layout (one map per table, natural keys, a join set)
//! so it behaves like the PostgreSQL store: deliveries and payments shared by
//! name/transaction overwrite each other, join rows accumulate. Used by tests
//! and for running the pipeline without a database.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::OrderRepository;
use crate::error::{OrderError, Result};
use crate::models::{Delivery, Item, Order, Payment};

// == Tables ==
/// Orders row: scalar columns plus the natural keys of its delivery and payment.
#[derive(Debug, Clone, PartialEq)]
struct OrderRow {
    entry: String,
    delivery_id: String,
    payment_id: String,
    track_number: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: String,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Tables {
    deliveries: HashMap<String, Delivery>,
    payments: HashMap<String, Payment>,
    items: HashMap<String, Item>,
    orders: HashMap<String, OrderRow>,
    contents: BTreeSet<(String, String)>,
    hash: BTreeSet<String>,
}

// == Memory Order Store ==
/// Order store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    tables: Mutex<Tables>,
    /// When false every call fails with `Persistence`, like an unreachable server
    available: AtomicBool,
    closed: AtomicBool,
    writes: AtomicU64,
}

impl MemoryOrderStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of committed `upsert_order` transactions.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of Orders rows.
    pub fn order_count(&self) -> usize {
        self.lock().map(|t| t.orders.len()).unwrap_or(0)
    }

    /// Delivery row stored under `name`, if any.
    pub fn delivery(&self, name: &str) -> Option<Delivery> {
        self.lock().ok()?.deliveries.get(name).cloned()
    }

    /// True when both stores hold exactly the same rows.
    pub fn same_state(&self, other: &MemoryOrderStore) -> bool {
        match (self.lock(), other.lock()) {
            (Ok(a), Ok(b)) => *a == *b,
            _ => false,
        }
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrderError::Persistence("store is closed".to_string()));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(OrderError::Persistence("store unreachable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| OrderError::Internal("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderStore {
    // == Upsert ==
    async fn upsert_order(&self, order: &Order) -> Result<()> {
        self.ensure_reachable()?;
        let mut tables = self.lock()?;

        // Work on a copy so a failure cannot leave half an order behind
        let mut next = tables.clone();
        next.deliveries
            .insert(order.delivery.name.clone(), order.delivery.clone());
        next.payments
            .insert(order.payment.transaction.clone(), order.payment.clone());
        for item in &order.items {
            let stored = Item {
                track_number: String::new(),
                ..item.clone()
            };
            next.items.insert(item.chrt_id.clone(), stored);
        }
        next.orders.insert(
            order.order_uid.clone(),
            OrderRow {
                entry: order.entry.clone(),
                delivery_id: order.delivery.name.clone(),
                payment_id: order.payment.transaction.clone(),
                track_number: order.track_number.clone(),
                locale: order.locale.clone(),
                internal_signature: order.internal_signature.clone(),
                customer_id: order.customer_id.clone(),
                delivery_service: order.delivery_service.clone(),
                shardkey: order.shardkey.clone(),
                sm_id: order.sm_id.clone(),
                date_created: order.date_created,
                oof_shard: order.oof_shard.clone(),
            },
        );
        for item in &order.items {
            next.contents
                .insert((order.order_uid.clone(), item.chrt_id.clone()));
        }

        *tables = next;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    // == Read ==
    async fn get_order(&self, id: &str) -> Result<Order> {
        self.ensure_reachable()?;
        let tables = self.lock()?;

        let row = tables
            .orders
            .get(id)
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;

        let delivery = tables
            .deliveries
            .get(&row.delivery_id)
            .cloned()
            .ok_or_else(|| OrderError::persistence("loading delivery", "missing row"))?;
        let payment = tables
            .payments
            .get(&row.payment_id)
            .cloned()
            .ok_or_else(|| OrderError::persistence("loading payment", "missing row"))?;

        let items = tables
            .contents
            .iter()
            .filter(|(order_uid, _)| order_uid == id)
            .filter_map(|(_, chrt_id)| tables.items.get(chrt_id))
            .map(|item| Item {
                track_number: row.track_number.clone(),
                ..item.clone()
            })
            .collect();

        Ok(Order {
            order_uid: id.to_string(),
            track_number: row.track_number.clone(),
            entry: row.entry.clone(),
            delivery,
            payment,
            items,
            locale: row.locale.clone(),
            internal_signature: row.internal_signature.clone(),
            customer_id: row.customer_id.clone(),
            delivery_service: row.delivery_service.clone(),
            shardkey: row.shardkey.clone(),
            sm_id: row.sm_id.clone(),
            date_created: row.date_created,
            oof_shard: row.oof_shard.clone(),
        })
    }

    // == Cache Index ==
    async fn mark_cache_resident(&self, id: &str) -> Result<()> {
        self.ensure_reachable()?;
        self.lock()?.hash.insert(id.to_string());
        Ok(())
    }

    async fn clear_cache_resident(&self, id: &str) -> Result<()> {
        self.ensure_reachable()?;
        if self.lock()?.hash.remove(id) {
            Ok(())
        } else {
            Err(OrderError::NotFound(format!("cache index entry {}", id)))
        }
    }

    async fn list_cache_resident_ids(&self) -> Result<Vec<String>> {
        self.ensure_reachable()?;
        Ok(self.lock()?.hash.iter().cloned().collect())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
