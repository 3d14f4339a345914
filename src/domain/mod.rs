// ============================================================================
// Domain Layer
// ============================================================================
//
// Plain value types and message rules. Nothing here touches the broker,
// the database or the cache.
//
// ============================================================================

pub mod order;
