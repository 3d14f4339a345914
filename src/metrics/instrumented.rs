use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::OrderCache;
use crate::domain::order::Order;
use crate::store::{OrderStore, StoreResult};
use super::{Reporter, RESULT_ERROR, RESULT_OK};

// ============================================================================
// Instrumentation Decorators
// ============================================================================
//
// Wrappers that implement the same capability trait as the component they
// wrap, adding a tracing span and a `storage_ops_total` increment per call.
// The wrapped component is unaware of them.
//
// ============================================================================

const RESULT_NOT_FOUND: &str = "not_found";
const RESULT_HIT: &str = "hit";
const RESULT_MISS: &str = "miss";

fn store_result<T>(result: &StoreResult<T>) -> &'static str {
    match result {
        Ok(_) => RESULT_OK,
        Err(e) if e.is_not_found() => RESULT_NOT_FOUND,
        Err(_) => RESULT_ERROR,
    }
}

pub struct InstrumentedStore {
    inner: Arc<dyn OrderStore>,
    reporter: Arc<dyn Reporter>,
    name: &'static str,
}

impl InstrumentedStore {
    pub fn new(name: &'static str, inner: Arc<dyn OrderStore>, reporter: Arc<dyn Reporter>) -> Self {
        Self { inner, reporter, name }
    }

    fn record<T>(&self, op: &str, result: &StoreResult<T>) {
        self.reporter.inc_storage_op(self.name, op, store_result(result));
    }
}

#[async_trait]
impl OrderStore for InstrumentedStore {
    async fn create(&self, order: &Order) -> StoreResult<()> {
        let span = tracing::debug_span!("OrderStore.create", store = self.name, order_id = %order.id);
        let result = self.inner.create(order).instrument(span).await;
        self.record("create", &result);
        result
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Order> {
        let span = tracing::debug_span!("OrderStore.get_by_id", store = self.name, order_id = %id);
        let result = self.inner.get_by_id(id).instrument(span).await;
        self.record("get_by_id", &result);
        result
    }

    async fn get_all_last_24_hours(&self) -> StoreResult<Vec<Order>> {
        let span = tracing::debug_span!("OrderStore.get_all_last_24_hours", store = self.name);
        let result = self.inner.get_all_last_24_hours().instrument(span).await;
        self.record("get_all_last_24_hours", &result);
        result
    }

    async fn ping(&self) -> StoreResult<()> {
        let span = tracing::trace_span!("OrderStore.ping", store = self.name);
        let result = self.inner.ping().instrument(span).await;
        self.record("ping", &result);
        result
    }
}

pub struct InstrumentedCache {
    inner: Arc<dyn OrderCache>,
    reporter: Arc<dyn Reporter>,
}

impl InstrumentedCache {
    pub fn new(inner: Arc<dyn OrderCache>, reporter: Arc<dyn Reporter>) -> Self {
        Self { inner, reporter }
    }
}

#[async_trait]
impl OrderCache for InstrumentedCache {
    async fn set(&self, id: Uuid, order: Order) {
        let span = tracing::trace_span!("OrderCache.set", order_id = %id);
        self.inner.set(id, order).instrument(span).await;
        self.reporter.inc_storage_op("cache", "set", RESULT_OK);
    }

    async fn get(&self, id: Uuid) -> Option<Order> {
        let span = tracing::trace_span!("OrderCache.get", order_id = %id);
        let order = self.inner.get(id).instrument(span).await;
        let result = if order.is_some() { RESULT_HIT } else { RESULT_MISS };
        self.reporter.inc_storage_op("cache", "get", result);
        order
    }
}
