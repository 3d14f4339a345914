use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

// ============================================================================
// Order Aggregate
// ============================================================================
//
// The order root owns its delivery, payment and item snapshot. Items and
// banks are shared across orders in the store and are referenced there by
// natural key (item `rid`, bank `name`), never by pointer.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    #[serde(rename = "order_uid")]
    pub id: Uuid,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: Option<String>,
    pub customer_id: String,
    pub delivery_service: Option<String>,
    #[serde(rename = "shardkey")]
    pub shard_key: String,
    pub sm_id: Option<i64>,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

impl Order {
    /// Rids of every item in the order, in message order.
    pub fn item_rids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.rid.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: Option<String>,
    pub email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Payment {
    pub transaction: String,
    pub request_id: Option<String>,
    pub currency: String,
    pub provider: String,
    pub amount: f64,
    /// Epoch seconds.
    pub payment_dt: i64,
    pub bank: Bank,
    pub delivery_cost: f64,
    pub goods_total: i64,
    pub custom_fee: f64,
}

/// Bank rows are deduplicated by name. `id` is zero until the row is resolved
/// against the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Bank {
    #[serde(skip_serializing_if = "is_unresolved", default)]
    pub id: i64,
    pub name: String,
}

fn is_unresolved(id: &i64) -> bool {
    *id == 0
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Item {
    pub chrt_id: Option<i64>,
    pub track_number: String,
    pub price: f64,
    pub rid: String,
    pub name: String,
    pub sale: Option<i64>,
    pub size: Option<String>,
    pub total_price: f64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

// ============================================================================
// Unit Tests
// ============================================================================
