use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::OrderCache;
use crate::domain::order::Order;
use crate::store::{OrderStore, StoreResult};
use super::OrderSink;

// ============================================================================
// Order Service
// ============================================================================
//
// Orchestrates: store (source of truth) ←→ cache (read side)
//
// - writes go straight to the store and do NOT touch the cache, so a new
//   order only reaches the cache on its first read miss
// - reads are cache-aside
// - warm-up preloads everything created in the last 24 hours
//
// ============================================================================

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<dyn OrderCache>) -> Self {
        Self { store, cache }
    }

    #[tracing::instrument(name = "OrderService.create_order", skip_all, fields(order_id = %order.id))]
    pub async fn create_order(&self, order: &Order) -> StoreResult<()> {
        self.store.create(order).await
    }

    /// Cache first; on a miss read the store and populate the cache.
    /// `StoreError::NotFound` means the order does not exist.
    #[tracing::instrument(name = "OrderService.get_order", skip(self))]
    pub async fn get_order(&self, id: Uuid) -> StoreResult<Order> {
        if let Some(order) = self.cache.get(id).await {
            return Ok(order);
        }

        let order = self.store.get_by_id(id).await?;
        self.cache.set(id, order.clone()).await;
        Ok(order)
    }

    /// Returns how many orders were loaded into the cache.
    #[tracing::instrument(name = "OrderService.warm_up", skip(self))]
    pub async fn warm_up(&self) -> StoreResult<usize> {
        let orders = self.store.get_all_last_24_hours().await?;
        let count = orders.len();

        for order in orders {
            self.cache.set(order.id, order).await;
        }

        tracing::info!(count = count, "Cache warm-up finished");
        Ok(count)
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.store.ping().await
    }
}

#[async_trait]
impl OrderSink for OrderService {
    async fn create_order(&self, order: &Order) -> StoreResult<()> {
        OrderService::create_order(self, order).await
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
