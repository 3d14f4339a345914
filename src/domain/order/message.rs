use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::aggregate::{Bank, Delivery, Item, Order, Payment};
use super::errors::{MappingError, ValidationError};

// ============================================================================
// Inbound Order Message - JSON body of the order topic
// ============================================================================
//
// Every field defaults when absent so that a missing field is reported by
// `validate` together with all other violations instead of failing decode.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct OrderMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub order_uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub track_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub entry: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery: DeliveryMessage,
    #[serde(deserialize_with = "null_as_default")]
    pub payment: PaymentMessage,
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<ItemMessage>,
    #[serde(deserialize_with = "null_as_default")]
    pub locale: String,
    pub internal_signature: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub customer_id: String,
    pub delivery_service: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub shardkey: String,
    pub sm_id: Option<i64>,
    pub date_created: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_default")]
    pub oof_shard: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct DeliveryMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub zip: String,
    #[serde(deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    pub region: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct PaymentMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub transaction: String,
    pub request_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub provider: String,
    #[serde(deserialize_with = "null_as_default")]
    pub amount: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub payment_dt: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub bank: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_cost: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub goods_total: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub custom_fee: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ItemMessage {
    pub chrt_id: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub track_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub price: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub rid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub sale: Option<i64>,
    pub size: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub total_price: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub nm_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub brand: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: i32,
}

/// JSON `null` reads as the field's default, same as an absent field, so a
/// nulled field is reported by `validate` rather than failing decode.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// `0001-01-01T00:00:00Z`, the zero instant some producers send for "unset".
const ZERO_TIME_SECS: i64 = -62_135_596_800;

fn is_zero_time(t: &DateTime<Utc>) -> bool {
    t.timestamp() == ZERO_TIME_SECS && t.timestamp_subsec_nanos() == 0
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl OrderMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Check the field-level contract, collecting every violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        let mut require = |value: &str, field: &str| {
            if is_blank(value) {
                violations.push(format!("{field} is required"));
            }
        };

        require(&self.track_number, "track_number");
        require(&self.entry, "entry");
        require(&self.locale, "locale");
        require(&self.customer_id, "customer_id");
        require(&self.shardkey, "shardkey");
        require(&self.oof_shard, "oof_shard");

        require(&self.delivery.name, "delivery.name");
        require(&self.delivery.phone, "delivery.phone");
        require(&self.delivery.zip, "delivery.zip");
        require(&self.delivery.city, "delivery.city");
        require(&self.delivery.address, "delivery.address");
        require(&self.delivery.email, "delivery.email");

        require(&self.payment.transaction, "payment.transaction");
        require(&self.payment.currency, "payment.currency");
        require(&self.payment.provider, "payment.provider");
        require(&self.payment.bank, "payment.bank");

        for (i, item) in self.items.iter().enumerate() {
            require(&item.track_number, &format!("items[{i}].track_number"));
            require(&item.rid, &format!("items[{i}].rid"));
            require(&item.name, &format!("items[{i}].name"));
            require(&item.brand, &format!("items[{i}].brand"));
        }

        if is_blank(&self.order_uid) {
            violations.push("order_uid is required".to_string());
        } else if let Err(e) = Uuid::parse_str(&self.order_uid) {
            violations.push(format!("order_uid invalid: {e}"));
        }

        match &self.date_created {
            None => violations.push("date_created is required".to_string()),
            Some(t) if is_zero_time(t) => violations.push("date_created is required".to_string()),
            Some(_) => {}
        }

        let payment = &self.payment;
        if payment.payment_dt <= 0 {
            violations.push("payment.payment_dt must be positive".to_string());
        }
        if payment.amount < 0.0
            || payment.delivery_cost < 0.0
            || payment.goods_total < 0
            || payment.custom_fee < 0.0
        {
            violations.push("payment values must be non-negative".to_string());
        }

        if self.items.is_empty() {
            violations.push("items must not be empty".to_string());
        }
        for (i, item) in self.items.iter().enumerate() {
            if item.nm_id <= 0 {
                violations.push(format!("items[{i}].nm_id must be positive"));
            }
            if item.price < 0.0 || item.total_price < 0.0 {
                violations.push(format!("items[{i}].price/total_price must be non-negative"));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}

impl TryFrom<OrderMessage> for Order {
    type Error = MappingError;

    fn try_from(msg: OrderMessage) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&msg.order_uid)?;
        let date_created = msg
            .date_created
            .filter(|t| !is_zero_time(t))
            .ok_or(MappingError::MissingDateCreated)?;

        let items = msg
            .items
            .into_iter()
            .map(|it| Item {
                chrt_id: it.chrt_id,
                track_number: it.track_number,
                price: it.price,
                rid: it.rid,
                name: it.name,
                sale: it.sale,
                size: it.size,
                total_price: it.total_price,
                nm_id: it.nm_id,
                brand: it.brand,
                status: it.status,
            })
            .collect();

        let d = msg.delivery;
        let p = msg.payment;

        Ok(Order {
            id,
            track_number: msg.track_number,
            entry: msg.entry,
            delivery: Delivery {
                name: d.name,
                phone: d.phone,
                zip: d.zip,
                city: d.city,
                address: d.address,
                region: d.region,
                email: d.email,
            },
            payment: Payment {
                transaction: p.transaction,
                request_id: p.request_id,
                currency: p.currency,
                provider: p.provider,
                amount: p.amount,
                payment_dt: p.payment_dt,
                bank: Bank { id: 0, name: p.bank },
                delivery_cost: p.delivery_cost,
                goods_total: p.goods_total,
                custom_fee: p.custom_fee,
            },
            items,
            locale: msg.locale,
            internal_signature: msg.internal_signature,
            customer_id: msg.customer_id,
            delivery_service: msg.delivery_service,
            shard_key: msg.shardkey,
            sm_id: msg.sm_id,
            date_created,
            oof_shard: msg.oof_shard,
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
