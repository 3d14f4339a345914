// ============================================================================
// Order Cache - read-side capability
// ============================================================================

mod ttl;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::Order;

pub use ttl::TtlCache;

/// Keyed order cache used by the service's cache-aside read path.
#[async_trait]
pub trait OrderCache: Send + Sync {
    /// Store or overwrite unconditionally.
    async fn set(&self, id: Uuid, order: Order);

    /// A copy of the cached order, if present.
    async fn get(&self, id: Uuid) -> Option<Order>;
}
