//! Database Models
//!
//! Row shapes as stored in SQLite and their conversion into domain records.
//! Nullable and non-finite numeric columns decode to zero, nullable text to "".
//! Queries cast numeric columns before they reach these rows, so text stored
//! in a numeric column arrives as a number.

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::FromRow;

use crate::domain::entities::raw_records::{
    finite_or_zero, Brand, CustomerLocation, OrderPayload, RawMarketingSpend, RawOrder,
    RawRevenueTransaction,
};
use crate::domain::entities::rollup::DailyRollup;
use crate::domain::errors::StoreError;

/// Brand record in database
#[derive(Debug, Clone, FromRow)]
pub struct BrandRecord {
    pub id: i64,
    pub name: String,
}

impl From<BrandRecord> for Brand {
    fn from(row: BrandRecord) -> Self {
        Brand {
            id: row.id,
            name: row.name,
        }
    }
}

/// Customer directory record in database
#[derive(Debug, Clone, FromRow)]
pub struct CustomerRecord {
    pub username: String,
    pub province: Option<String>,
    pub district: Option<String>,
}

impl From<CustomerRecord> for CustomerLocation {
    fn from(row: CustomerRecord) -> Self {
        CustomerLocation {
            username: row.username,
            province: row.province.unwrap_or_default(),
            district: row.district.unwrap_or_default(),
        }
    }
}

/// Raw order record in database
#[derive(Debug, Clone, FromRow)]
pub struct OrderRecord {
    pub brand_id: i64,
    pub source: String,
    pub order_code: String,
    pub created_at: NaiveDateTime,
    pub status: Option<String>,
    pub shipped_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
    pub payload: Option<String>, // JSON string
    pub cogs: Option<f64>,
    pub original_price: Option<f64>,
    pub subsidy_amount: Option<f64>,
    pub buyer_username: Option<String>,
}

impl From<OrderRecord> for RawOrder {
    fn from(row: OrderRecord) -> Self {
        RawOrder {
            brand_id: row.brand_id,
            source: row.source,
            order_code: row.order_code,
            created_at: row.created_at,
            status: row.status.unwrap_or_default(),
            shipped_at: row.shipped_at,
            delivered_at: row.delivered_at,
            payload: row
                .payload
                .as_deref()
                .map(OrderPayload::from_json)
                .unwrap_or_default(),
            cogs: number(row.cogs),
            original_price: number(row.original_price),
            subsidy_amount: number(row.subsidy_amount),
            buyer_username: row.buyer_username.unwrap_or_default(),
        }
    }
}

/// Revenue transaction record in database
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub brand_id: i64,
    pub source: String,
    pub order_code: String,
    pub transaction_date: Option<NaiveDateTime>,
    pub net_revenue: Option<f64>,
    pub gmv: Option<f64>,
    pub total_fees: Option<f64>,
    pub refund_amount: Option<f64>,
    pub return_tracking_code: Option<String>,
}

impl From<TransactionRecord> for RawRevenueTransaction {
    fn from(row: TransactionRecord) -> Self {
        RawRevenueTransaction {
            brand_id: row.brand_id,
            source: row.source,
            order_code: row.order_code,
            transaction_date: row.transaction_date,
            net_revenue: number(row.net_revenue),
            gmv: number(row.gmv),
            total_fees: number(row.total_fees),
            refund_amount: number(row.refund_amount),
            return_tracking_code: row.return_tracking_code.filter(|code| !code.is_empty()),
        }
    }
}

/// Marketing spend record in database
#[derive(Debug, Clone, FromRow)]
pub struct MarketingRecord {
    pub brand_id: i64,
    pub source: String,
    pub date: NaiveDate,
    pub ad_spend: Option<f64>,
    pub impressions: Option<i64>,
    pub clicks: Option<i64>,
    pub conversions: Option<i64>,
    pub reach: Option<i64>,
}

impl From<MarketingRecord> for RawMarketingSpend {
    fn from(row: MarketingRecord) -> Self {
        RawMarketingSpend {
            brand_id: row.brand_id,
            source: row.source,
            date: row.date,
            ad_spend: number(row.ad_spend),
            impressions: counter(row.impressions),
            clicks: counter(row.clicks),
            conversions: counter(row.conversions),
            reach: counter(row.reach),
        }
    }
}

/// Buyer order history aggregated from raw orders
#[derive(Debug, Clone, FromRow)]
pub struct BuyerHistoryRecord {
    pub source: String,
    pub buyer_username: String,
    pub prior_orders: i64,
    pub last_order_at: Option<String>,
}

impl BuyerHistoryRecord {
    /// `MAX(created_at)` comes back as plain text.
    pub fn last_order_at(&self) -> Option<NaiveDateTime> {
        self.last_order_at.as_deref().and_then(|raw| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()
        })
    }
}

/// Rollup record in database (Total rows carry no source)
#[derive(Debug, Clone, FromRow)]
pub struct RollupRecord {
    pub data: String, // JSON string of the full DailyRollup
}

impl TryFrom<RollupRecord> for DailyRollup {
    type Error = StoreError;

    fn try_from(row: RollupRecord) -> Result<Self, Self::Error> {
        Ok(serde_json::from_str(&row.data)?)
    }
}

fn number(value: Option<f64>) -> f64 {
    value.map(finite_or_zero).unwrap_or(0.0)
}

fn counter(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}
