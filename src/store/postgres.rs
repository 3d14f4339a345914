use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Connection;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseSettings;
use crate::domain::order::{Bank, Delivery, Item, Order, Payment};
use super::{OrderStore, StoreError, StoreResult};

// ============================================================================
// PostgreSQL Order Repository
// ============================================================================
//
// Writes: one transaction per aggregate. Every insert is conflict-tolerant so
// that broker redelivery of an already persisted order is harmless:
//   orders       ON CONFLICT (order_id)          DO NOTHING
//   delivery     ON CONFLICT (order_id)          DO NOTHING
//   banks        ON CONFLICT (name)              DO UPDATE (returns the id)
//   payments     ON CONFLICT (transaction)       DO NOTHING
//   items        ON CONFLICT (rid)               DO UPDATE SET status
//   order_items  ON CONFLICT (order_id, item_id) DO NOTHING
//
// Reads: four independent queries, no shared snapshot. A missing delivery or
// payment row reads back as default values; only a missing order row is
// `NotFound`.
//
// ============================================================================

const INSERT_ORDER: &str = "
    INSERT INTO orders.orders
        (order_id, track_number, entry, locale, internal_signature, customer_id,
         delivery_service, shardkey, sm_id, date_created, oof_shard)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (order_id) DO NOTHING";

const INSERT_DELIVERY: &str = "
    INSERT INTO orders.delivery
        (order_id, name, phone, zip, city, address, region, email)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (order_id) DO NOTHING";

// The no-op update makes RETURNING yield the existing id on conflict.
const UPSERT_BANK: &str = "
    INSERT INTO banks.banks (name) VALUES ($1)
    ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
    RETURNING id";

const INSERT_PAYMENT: &str = "
    INSERT INTO orders.payments
        (order_id, transaction, request_id, currency, provider, amount,
         payment_dt, bank_id, delivery_cost, goods_total, custom_fee)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (transaction) DO NOTHING";

const UPSERT_ITEM: &str = "
    INSERT INTO orders.items
        (chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, brand, status)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (rid) DO UPDATE SET status = EXCLUDED.status
    RETURNING id";

const LINK_ITEM: &str = "
    INSERT INTO orders.order_items (order_id, item_id)
    VALUES ($1, $2)
    ON CONFLICT (order_id, item_id) DO NOTHING";

const SELECT_ORDER: &str = "
    SELECT order_id, track_number, entry, locale, internal_signature, customer_id,
           delivery_service, shardkey, sm_id, date_created, oof_shard
    FROM orders.orders
    WHERE order_id = $1";

const SELECT_DELIVERY: &str = "
    SELECT name, phone, zip, city, address, region, email
    FROM orders.delivery
    WHERE order_id = $1";

const SELECT_PAYMENT: &str = "
    SELECT p.transaction, p.request_id, p.currency, p.provider, p.amount,
           p.payment_dt, p.delivery_cost, p.goods_total, p.custom_fee,
           b.id AS bank_id, b.name AS bank_name
    FROM orders.payments p
    JOIN banks.banks b ON p.bank_id = b.id
    WHERE p.order_id = $1";

const SELECT_ITEMS: &str = "
    SELECT i.chrt_id, i.track_number, i.price, i.rid, i.name,
           i.sale, i.size, i.total_price, i.nm_id, i.brand, i.status
    FROM orders.items i
    JOIN orders.order_items oi ON i.id = oi.item_id
    WHERE oi.order_id = $1";

const SELECT_RECENT_IDS: &str = "
    SELECT order_id
    FROM orders.orders
    WHERE date_created >= NOW() - INTERVAL '24 hours'";

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: Uuid,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: Option<String>,
    customer_id: String,
    delivery_service: Option<String>,
    shardkey: String,
    sm_id: Option<i64>,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    name: String,
    phone: String,
    zip: String,
    city: String,
    address: String,
    region: Option<String>,
    email: String,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    transaction: String,
    request_id: Option<String>,
    currency: String,
    provider: String,
    amount: f64,
    payment_dt: i64,
    delivery_cost: f64,
    goods_total: i64,
    custom_fee: f64,
    bank_id: i64,
    bank_name: String,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    chrt_id: Option<i64>,
    track_number: String,
    price: f64,
    rid: String,
    name: String,
    sale: Option<i64>,
    size: Option<String>,
    total_price: f64,
    nm_id: i64,
    brand: String,
    status: i32,
}

impl From<DeliveryRow> for Delivery {
    fn from(r: DeliveryRow) -> Self {
        Self {
            name: r.name,
            phone: r.phone,
            zip: r.zip,
            city: r.city,
            address: r.address,
            region: r.region,
            email: r.email,
        }
    }
}

impl From<PaymentRow> for Payment {
    fn from(r: PaymentRow) -> Self {
        Self {
            transaction: r.transaction,
            request_id: r.request_id,
            currency: r.currency,
            provider: r.provider,
            amount: r.amount,
            payment_dt: r.payment_dt,
            bank: Bank { id: r.bank_id, name: r.bank_name },
            delivery_cost: r.delivery_cost,
            goods_total: r.goods_total,
            custom_fee: r.custom_fee,
        }
    }
}

impl From<ItemRow> for Item {
    fn from(r: ItemRow) -> Self {
        Self {
            chrt_id: r.chrt_id,
            track_number: r.track_number,
            price: r.price,
            rid: r.rid,
            name: r.name,
            sale: r.sale,
            size: r.size,
            total_price: r.total_price,
            nm_id: r.nm_id,
            brand: r.brand,
            status: r.status,
        }
    }
}

impl OrderRow {
    fn into_order(self, delivery: Delivery, payment: Payment, items: Vec<Item>) -> Order {
        Order {
            id: self.order_id,
            track_number: self.track_number,
            entry: self.entry,
            delivery,
            payment,
            items,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shard_key: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
        }
    }
}

async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout { operation, timeout })?
}

#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self { pool, read_timeout, write_timeout }
    }

    /// Build the connection pool and verify one connection can be opened.
    pub async fn connect(settings: &DatabaseSettings) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.write_timeout())
            .connect(&settings.url)
            .await
            .map_err(StoreError::database("connect to postgres"))?;

        tracing::info!(
            max_connections = settings.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self::new(pool, settings.read_timeout(), settings.write_timeout()))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    #[cfg(test)]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The transaction guard rolls back when dropped uncommitted, which covers
    /// early returns, the write timeout and unwinding panics alike.
    async fn insert_aggregate(&self, order: &Order) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::database("begin tx"))?;

        sqlx::query(INSERT_ORDER)
            .bind(order.id)
            .bind(&order.track_number)
            .bind(&order.entry)
            .bind(&order.locale)
            .bind(&order.internal_signature)
            .bind(&order.customer_id)
            .bind(&order.delivery_service)
            .bind(&order.shard_key)
            .bind(order.sm_id)
            .bind(order.date_created)
            .bind(&order.oof_shard)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::database("insert order"))?;

        let d = &order.delivery;
        sqlx::query(INSERT_DELIVERY)
            .bind(order.id)
            .bind(&d.name)
            .bind(&d.phone)
            .bind(&d.zip)
            .bind(&d.city)
            .bind(&d.address)
            .bind(&d.region)
            .bind(&d.email)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::database("insert delivery"))?;

        let p = &order.payment;
        let bank_id: i64 = sqlx::query_scalar(UPSERT_BANK)
            .bind(&p.bank.name)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::database("upsert bank"))?;

        sqlx::query(INSERT_PAYMENT)
            .bind(order.id)
            .bind(&p.transaction)
            .bind(&p.request_id)
            .bind(&p.currency)
            .bind(&p.provider)
            .bind(p.amount)
            .bind(p.payment_dt)
            .bind(bank_id)
            .bind(p.delivery_cost)
            .bind(p.goods_total)
            .bind(p.custom_fee)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::database("insert payment"))?;

        for item in &order.items {
            let item_id: i64 = sqlx::query_scalar(UPSERT_ITEM)
                .bind(item.chrt_id)
                .bind(&item.track_number)
                .bind(item.price)
                .bind(&item.rid)
                .bind(&item.name)
                .bind(item.sale)
                .bind(&item.size)
                .bind(item.total_price)
                .bind(item.nm_id)
                .bind(&item.brand)
                .bind(item.status)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::database("upsert item"))?;

            sqlx::query(LINK_ITEM)
                .bind(order.id)
                .bind(item_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::database("link item to order"))?;
        }

        tx.commit().await.map_err(StoreError::database("commit tx"))?;

        tracing::debug!(
            order_id = %order.id,
            bank_id = bank_id,
            rids = ?order.item_rids().collect::<Vec<_>>(),
            "Order aggregate committed"
        );

        Ok(())
    }

    async fn assemble(&self, id: Uuid) -> StoreResult<Order> {
        let order: OrderRow = sqlx::query_as(SELECT_ORDER)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database("query order"))?
            .ok_or(StoreError::NotFound(id))?;

        let delivery: Option<DeliveryRow> = sqlx::query_as(SELECT_DELIVERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database("query delivery"))?;

        let payment: Option<PaymentRow> = sqlx::query_as(SELECT_PAYMENT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database("query payment"))?;

        let items: Vec<ItemRow> = sqlx::query_as(SELECT_ITEMS)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::database("query items"))?;

        if delivery.is_none() || payment.is_none() {
            tracing::warn!(
                order_id = %id,
                has_delivery = delivery.is_some(),
                has_payment = payment.is_some(),
                "Order assembled with missing delivery or payment row"
            );
        }

        Ok(order.into_order(
            delivery.map(Delivery::from).unwrap_or_default(),
            payment.map(Payment::from).unwrap_or_default(),
            items.into_iter().map(Item::from).collect(),
        ))
    }
}

#[async_trait]
impl OrderStore for PgOrderRepository {
    async fn create(&self, order: &Order) -> StoreResult<()> {
        bounded("create order", self.write_timeout, self.insert_aggregate(order)).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Order> {
        bounded("get order", self.read_timeout, self.assemble(id)).await
    }

    async fn get_all_last_24_hours(&self) -> StoreResult<Vec<Order>> {
        let ids: Vec<Uuid> = bounded("list recent orders", self.read_timeout, async {
            sqlx::query_scalar(SELECT_RECENT_IDS)
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::database("query order ids"))
        })
        .await?;

        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_by_id(id).await {
                Ok(order) => orders.push(order),
                Err(e) => {
                    tracing::warn!(order_id = %id, error = %e, "Skipping order that failed to assemble");
                }
            }
        }

        Ok(orders)
    }

    async fn ping(&self) -> StoreResult<()> {
        bounded("ping", self.read_timeout, async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(StoreError::database("acquire connection"))?;
            conn.ping().await.map_err(StoreError::database("ping"))
        })
        .await
    }
}

// ============================================================================
// Integration Tests (require TEST_DB_DSN)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::aggregate::tests::sample_order;

    async fn test_repository() -> Option<PgOrderRepository> {
        let dsn = match std::env::var("TEST_DB_DSN") {
            Ok(dsn) => dsn,
            Err(_) => {
                eprintln!("TEST_DB_DSN not set, skipping");
                return None;
            }
        };

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&dsn)
            .await
            .expect("connect to test database");
        let repo = PgOrderRepository::new(pool, Duration::from_secs(5), Duration::from_secs(5));
        repo.migrate().await.expect("apply migrations");
        Some(repo)
    }

    async fn count(repo: &PgOrderRepository, sql: &str, id: Uuid) -> i64 {
        sqlx::query_scalar(sql)
            .bind(id)
            .fetch_one(repo.pool())
            .await
            .expect("count rows")
    }

    async fn cleanup(repo: &PgOrderRepository, orders: &[&Order]) {
        let pool = repo.pool();
        for order in orders {
            let _ = sqlx::query("DELETE FROM orders.order_items WHERE order_id = $1").bind(order.id).execute(pool).await;
            let _ = sqlx::query("DELETE FROM orders.payments WHERE order_id = $1").bind(order.id).execute(pool).await;
            let _ = sqlx::query("DELETE FROM orders.delivery WHERE order_id = $1").bind(order.id).execute(pool).await;
            let _ = sqlx::query("DELETE FROM orders.orders WHERE order_id = $1").bind(order.id).execute(pool).await;
            for rid in order.item_rids() {
                let _ = sqlx::query("DELETE FROM orders.items WHERE rid = $1").bind(rid).execute(pool).await;
            }
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let Some(repo) = test_repository().await else { return };
        let order = sample_order(Uuid::new_v4());

        repo.create(&order).await.unwrap();
        let got = repo.get_by_id(order.id).await.unwrap();

        assert_eq!(got.id, order.id);
        assert_eq!(got.track_number, order.track_number);
        assert_eq!(got.delivery, order.delivery);
        assert_eq!(got.payment.bank.name, order.payment.bank.name);
        assert!(got.payment.bank.id > 0);
        assert_eq!(got.items.len(), 1);
        assert_eq!(got.items[0].rid, order.items[0].rid);

        let recent = repo.get_all_last_24_hours().await.unwrap();
        assert!(recent.iter().any(|o| o.id == order.id));

        cleanup(&repo, &[&order]).await;
    }

    #[tokio::test]
    async fn test_create_twice_is_idempotent_and_updates_item_status() {
        let Some(repo) = test_repository().await else { return };
        let mut order = sample_order(Uuid::new_v4());

        repo.create(&order).await.unwrap();
        order.items[0].status = 2;
        repo.create(&order).await.unwrap();

        assert_eq!(count(&repo, "SELECT COUNT(*) FROM orders.orders WHERE order_id = $1", order.id).await, 1);
        assert_eq!(count(&repo, "SELECT COUNT(*) FROM orders.delivery WHERE order_id = $1", order.id).await, 1);
        assert_eq!(count(&repo, "SELECT COUNT(*) FROM orders.payments WHERE order_id = $1", order.id).await, 1);
        assert_eq!(count(&repo, "SELECT COUNT(*) FROM orders.order_items WHERE order_id = $1", order.id).await, 1);

        let got = repo.get_by_id(order.id).await.unwrap();
        assert_eq!(got.items[0].status, 2);

        cleanup(&repo, &[&order]).await;
    }

    #[tokio::test]
    async fn test_bank_row_is_shared_by_name() {
        let Some(repo) = test_repository().await else { return };
        let first = sample_order(Uuid::new_v4());
        let second = sample_order(Uuid::new_v4());

        repo.create(&first).await.unwrap();
        repo.create(&second).await.unwrap();

        let a = repo.get_by_id(first.id).await.unwrap();
        let b = repo.get_by_id(second.id).await.unwrap();
        assert_eq!(a.payment.bank.id, b.payment.bank.id);

        cleanup(&repo, &[&first, &second]).await;
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let Some(repo) = test_repository().await else { return };

        let err = repo.get_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
