//! Raw marketplace records as read from the record store.
//!
//! Records are immutable once written except by a corrective re-import. Every
//! numeric field that is missing or malformed in the source decodes to `0.0`
//! and every missing text field to the empty string.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::value_objects::source_filter::normalize_source;

/// A brand (seller account) owning raw records and rollups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawOrder {
    pub brand_id: i64,
    pub source: String,
    pub order_code: String,
    pub created_at: NaiveDateTime,
    pub status: String,
    pub shipped_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
    pub payload: OrderPayload,
    pub cogs: f64,
    pub original_price: f64,
    pub subsidy_amount: f64,
    pub buyer_username: String,
}

impl RawOrder {
    pub fn key(&self) -> OrderKey {
        OrderKey::new(&self.source, &self.order_code)
    }
}

/// Semi-structured part of an order export.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderPayload {
    #[serde(alias = "cancelReason", deserialize_with = "lenient_string")]
    pub cancel_reason: String,
    #[serde(alias = "paymentMethod", deserialize_with = "lenient_string")]
    pub payment_method: String,
    #[serde(alias = "line_items", deserialize_with = "lenient_items")]
    pub items: Vec<LineItem>,
    #[serde(alias = "address", deserialize_with = "lenient_shipping")]
    pub shipping: ShippingAddress,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    #[serde(deserialize_with = "lenient_string")]
    pub sku: String,
    #[serde(alias = "product_name", deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(alias = "qty", deserialize_with = "lenient_f64")]
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingAddress {
    #[serde(alias = "city", deserialize_with = "lenient_string")]
    pub province: String,
    #[serde(deserialize_with = "lenient_string")]
    pub district: String,
}

impl OrderPayload {
    /// Parse a stored payload, falling back to an empty payload when the JSON
    /// is malformed.
    pub fn from_json(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return OrderPayload::default();
        }
        match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed order payload, using empty payload");
                OrderPayload::default()
            }
        }
    }

    pub fn total_quantity(&self) -> f64 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRevenueTransaction {
    pub brand_id: i64,
    pub source: String,
    pub order_code: String,
    pub transaction_date: Option<NaiveDateTime>,
    pub net_revenue: f64,
    pub gmv: f64,
    pub total_fees: f64,
    /// Negative values are money returned to the buyer.
    pub refund_amount: f64,
    pub return_tracking_code: Option<String>,
}

impl RawRevenueTransaction {
    /// The order this transaction settles.
    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(&self.source, &self.order_code)
    }
}

/// Identity of an order. Order codes are only unique within a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderKey {
    pub source: String,
    pub order_code: String,
}

impl OrderKey {
    pub fn new(source: &str, order_code: &str) -> Self {
        OrderKey {
            source: normalize_source(source),
            order_code: order_code.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMarketingSpend {
    pub brand_id: i64,
    pub source: String,
    pub date: chrono::NaiveDate,
    pub ad_spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub reach: u64,
}

/// Customer directory entry joined by buyer username.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomerLocation {
    pub username: String,
    pub province: String,
    pub district: String,
}

/// Identity of a buyer. Marketplace usernames are scoped to their source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuyerKey {
    pub source: String,
    pub username: String,
}

impl BuyerKey {
    pub fn new(source: &str, username: &str) -> Self {
        BuyerKey {
            source: normalize_source(source),
            username: normalize_username(username),
        }
    }
}

/// Canonical form of a buyer username, shared by ingestion and lookups.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_string()
}

/// A buyer's order history strictly before the day being built.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BuyerHistory {
    pub prior_orders: u64,
    pub last_order_at: Option<NaiveDateTime>,
}

impl BuyerHistory {
    pub fn is_returning(&self) -> bool {
        self.prior_orders > 0
    }
}

/// Replace non-finite numbers with zero.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn value_to_f64(value: &serde_json::Value) -> f64 {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse::<f64>().unwrap_or(0.0),
        serde_json::Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    finite_or_zero(parsed)
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_items<'de, D>(deserializer: D) -> Result<Vec<LineItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(entries) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<LineItem>(entry).ok())
        .collect())
}

fn lenient_shipping<'de, D>(deserializer: D) -> Result<ShippingAddress, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}
