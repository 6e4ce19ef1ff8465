//! PostgreSQL order store
//!
//! Connection pooling through deadpool-postgres. Each `upsert_order` is one
//! transaction; rolling back happens when the transaction guard is dropped on
//! an early `?` return.

use async_trait::async_trait;
use deadpool_postgres::{
    Config as PoolSettings, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use tokio_postgres::{IsolationLevel, NoTls, Row};
use tracing::{debug, info};

use super::schema::SCHEMA;
use super::OrderRepository;
use crate::config::DatabaseConfig;
use crate::error::{OrderError, Result};
use crate::models::{Delivery, Item, Order, Payment};

// == SQL ==
const UPSERT_DELIVERY: &str = "
    INSERT INTO Delivery (name, phone, zip, city, address, region, email)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (name) DO UPDATE SET
        phone = EXCLUDED.phone,
        zip = EXCLUDED.zip,
        city = EXCLUDED.city,
        address = EXCLUDED.address,
        region = EXCLUDED.region,
        email = EXCLUDED.email";

const UPSERT_PAYMENT: &str = "
    INSERT INTO Payment (
        transaction, request_id, currency, provider, amount, payment_dt,
        bank, delivery_cost, goods_total, custom_fee
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (transaction) DO UPDATE SET
        request_id = EXCLUDED.request_id,
        currency = EXCLUDED.currency,
        provider = EXCLUDED.provider,
        amount = EXCLUDED.amount,
        payment_dt = EXCLUDED.payment_dt,
        bank = EXCLUDED.bank,
        delivery_cost = EXCLUDED.delivery_cost,
        goods_total = EXCLUDED.goods_total,
        custom_fee = EXCLUDED.custom_fee";

const UPSERT_ITEM: &str = "
    INSERT INTO Items (chrt_id, price, rid, name, sale, size, total_price, nm_id, brand, status)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (chrt_id) DO UPDATE SET
        price = EXCLUDED.price,
        rid = EXCLUDED.rid,
        name = EXCLUDED.name,
        sale = EXCLUDED.sale,
        size = EXCLUDED.size,
        total_price = EXCLUDED.total_price,
        nm_id = EXCLUDED.nm_id,
        brand = EXCLUDED.brand,
        status = EXCLUDED.status";

const UPSERT_ORDER: &str = "
    INSERT INTO Orders (
        order_uid, entry, delivery_id, payment_id, track_number, locale, internal_signature,
        customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
    ON CONFLICT (order_uid) DO UPDATE SET
        entry = EXCLUDED.entry,
        delivery_id = EXCLUDED.delivery_id,
        payment_id = EXCLUDED.payment_id,
        track_number = EXCLUDED.track_number,
        locale = EXCLUDED.locale,
        internal_signature = EXCLUDED.internal_signature,
        customer_id = EXCLUDED.customer_id,
        delivery_service = EXCLUDED.delivery_service,
        shardkey = EXCLUDED.shardkey,
        sm_id = EXCLUDED.sm_id,
        date_created = EXCLUDED.date_created,
        oof_shard = EXCLUDED.oof_shard";

const UPSERT_CONTENTS: &str = "
    INSERT INTO Order_contents (order_uid, chrt_id)
    VALUES ($1, $2)
    ON CONFLICT (order_uid, chrt_id) DO NOTHING";

const SELECT_ORDER: &str = "
    SELECT order_uid, entry, delivery_id, payment_id, track_number, locale, internal_signature,
           customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
    FROM Orders WHERE order_uid = $1";

const SELECT_DELIVERY: &str = "
    SELECT name, phone, zip, city, address, region, email
    FROM Delivery WHERE name = $1";

const SELECT_PAYMENT: &str = "
    SELECT transaction, request_id, currency, provider, amount, payment_dt,
           bank, delivery_cost, goods_total, custom_fee
    FROM Payment WHERE transaction = $1";

const SELECT_ITEMS: &str = "
    SELECT i.chrt_id, i.price, i.rid, i.name, i.sale, i.size, i.total_price, i.nm_id, i.brand, i.status
    FROM Items i JOIN Order_contents oc ON i.chrt_id = oc.chrt_id
    WHERE oc.order_uid = $1";

// == Postgres Order Store ==
/// Order store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: Pool,
}

impl PgOrderStore {
    // == Constructor ==
    /// Builds the pool, checks the server is reachable and applies the schema.
    ///
    /// Failing here is fatal for the service: nothing can be ingested or restored.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut settings = PoolSettings::new();
        settings.host = Some(config.host.clone());
        settings.port = Some(config.port);
        settings.dbname = Some(config.dbname.clone());
        settings.user = Some(config.user.clone());
        settings.password = Some(config.password.clone());
        settings.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        settings.pool = Some(PoolConfig::new(config.max_pool_size));

        let pool = settings
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| OrderError::persistence("creating pool", e))?;

        let client = pool.get().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| OrderError::persistence("applying schema", e))?;

        info!(
            "Connected to PostgreSQL at {}:{}/{}",
            config.host, config.port, config.dbname
        );
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool. The schema is assumed to be in place.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderStore {
    // == Upsert ==
    async fn upsert_order(&self, order: &Order) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| OrderError::persistence("beginning transaction", e))?;

        let d = &order.delivery;
        tx.execute(
            UPSERT_DELIVERY,
            &[&d.name, &d.phone, &d.zip, &d.city, &d.address, &d.region, &d.email],
        )
        .await
        .map_err(|e| OrderError::persistence("saving delivery", e))?;

        let p = &order.payment;
        tx.execute(
            UPSERT_PAYMENT,
            &[
                &p.transaction,
                &p.request_id,
                &p.currency,
                &p.provider,
                &p.amount,
                &p.payment_dt,
                &p.bank,
                &p.delivery_cost,
                &p.goods_total,
                &p.custom_fee,
            ],
        )
        .await
        .map_err(|e| OrderError::persistence("saving payment", e))?;

        for item in &order.items {
            tx.execute(
                UPSERT_ITEM,
                &[
                    &item.chrt_id,
                    &item.price,
                    &item.rid,
                    &item.name,
                    &item.sale,
                    &item.size,
                    &item.total_price,
                    &item.nm_id,
                    &item.brand,
                    &item.status,
                ],
            )
            .await
            .map_err(|e| OrderError::persistence("saving item", e))?;
        }

        tx.execute(
            UPSERT_ORDER,
            &[
                &order.order_uid,
                &order.entry,
                &d.name,
                &p.transaction,
                &order.track_number,
                &order.locale,
                &order.internal_signature,
                &order.customer_id,
                &order.delivery_service,
                &order.shardkey,
                &order.sm_id,
                &order.date_created,
                &order.oof_shard,
            ],
        )
        .await
        .map_err(|e| OrderError::persistence("saving order", e))?;

        for item in &order.items {
            tx.execute(UPSERT_CONTENTS, &[&order.order_uid, &item.chrt_id])
                .await
                .map_err(|e| OrderError::persistence("saving order contents", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| OrderError::persistence("committing transaction", e))?;

        debug!("Order {} written", order.order_uid);
        Ok(())
    }

    // == Read ==
    async fn get_order(&self, id: &str) -> Result<Order> {
        let mut client = self.pool.get().await?;
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await
            .map_err(|e| OrderError::persistence("beginning read", e))?;

        let row = tx
            .query_opt(SELECT_ORDER, &[&id])
            .await
            .map_err(|e| OrderError::persistence("loading order", e))?
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;

        let delivery_id: String = row.try_get("delivery_id")?;
        let payment_id: String = row.try_get("payment_id")?;
        let mut order = order_from_row(&row)?;

        let delivery = tx
            .query_one(SELECT_DELIVERY, &[&delivery_id])
            .await
            .map_err(|e| OrderError::persistence("loading delivery", e))?;
        order.delivery = delivery_from_row(&delivery)?;

        let payment = tx
            .query_one(SELECT_PAYMENT, &[&payment_id])
            .await
            .map_err(|e| OrderError::persistence("loading payment", e))?;
        order.payment = payment_from_row(&payment)?;

        let items = tx
            .query(SELECT_ITEMS, &[&id])
            .await
            .map_err(|e| OrderError::persistence("loading items", e))?;
        order.items = items
            .iter()
            .map(|row| item_from_row(row, &order.track_number))
            .collect::<Result<Vec<_>>>()?;

        tx.commit()
            .await
            .map_err(|e| OrderError::persistence("finishing read", e))?;
        Ok(order)
    }

    // == Cache Index ==
    async fn mark_cache_resident(&self, id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO Hash (order_id) VALUES ($1) ON CONFLICT (order_id) DO NOTHING",
                &[&id],
            )
            .await
            .map_err(|e| OrderError::persistence("saving cache index", e))?;
        Ok(())
    }

    async fn clear_cache_resident(&self, id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let removed = client
            .execute("DELETE FROM Hash WHERE order_id = $1", &[&id])
            .await
            .map_err(|e| OrderError::persistence("removing cache index", e))?;

        if removed == 0 {
            return Err(OrderError::NotFound(format!("cache index entry {}", id)));
        }
        Ok(())
    }

    async fn list_cache_resident_ids(&self) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT order_id FROM Hash", &[])
            .await
            .map_err(|e| OrderError::persistence("listing cache index", e))?;

        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(OrderError::from))
            .collect()
    }

    fn close(&self) {
        self.pool.close();
        info!("PostgreSQL pool closed");
    }
}

// == Row Mapping ==

fn order_from_row(row: &Row) -> Result<Order> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        entry: row.try_get("entry")?,
        track_number: row.try_get("track_number")?,
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
        ..Order::default()
    })
}

fn delivery_from_row(row: &Row) -> Result<Delivery> {
    Ok(Delivery {
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    })
}

fn payment_from_row(row: &Row) -> Result<Payment> {
    Ok(Payment {
        transaction: row.try_get("transaction")?,
        request_id: row.try_get("request_id")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    })
}

/// Items carry no tracking number column; it is the parent order's by invariant.
fn item_from_row(row: &Row, track_number: &str) -> Result<Item> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: track_number.to_string(),
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}
