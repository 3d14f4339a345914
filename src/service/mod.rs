// ============================================================================
// Service Layer
// ============================================================================

mod order_service;

use async_trait::async_trait;

use crate::domain::order::Order;
use crate::store::StoreResult;

pub use order_service::OrderService;

/// Write-side capability the ingestion handler persists through.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn create_order(&self, order: &Order) -> StoreResult<()>;
}
