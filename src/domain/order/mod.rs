// ============================================================================
// Order Domain
// ============================================================================
//
// - Aggregate (Order, Delivery, Payment, Bank, Item)
// - Inbound message (wire shape, validation, mapping to the aggregate)
// - Errors (ValidationError, MappingError)
//
// ============================================================================

pub mod aggregate;
pub mod message;
pub mod errors;

pub use aggregate::*;
pub use message::*;
pub use errors::*;
