// ============================================================================
// Order Store - persistence capability
// ============================================================================
//
// `OrderStore` is the narrow contract the service layer depends on. The
// PostgreSQL repository implements it; instrumentation wraps it without
// changing it.
//
// ============================================================================

pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::order::Order;
use crate::utils::IsTransient;

pub use postgres::PgOrderRepository;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Adapter for `map_err` that tags a driver error with what was running.
    pub(crate) fn database(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::Database { context, source }
    }
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout { .. } => true,
            StoreError::Database { source, .. } => matches!(
                source,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            StoreError::NotFound(_) | StoreError::Migrate(_) => false,
        }
    }
}

/// Persistence contract for the order aggregate.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist the whole aggregate atomically. Re-delivery of the same order is
    /// a no-op for the order, delivery and payment rows.
    async fn create(&self, order: &Order) -> StoreResult<()>;

    /// Reassemble one aggregate. Returns `StoreError::NotFound` when the order
    /// row does not exist.
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Order>;

    /// Every order created in the last 24 hours that could be assembled.
    async fn get_all_last_24_hours(&self) -> StoreResult<Vec<Order>>;

    async fn ping(&self) -> StoreResult<()>;
}
