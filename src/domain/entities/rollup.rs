//! Daily KPI rollup rows.
//!
//! A rollup is keyed by `(brand, date)` for the Total family or
//! `(brand, date, source)` for the PerSource family. Financial totals,
//! category counters, marketing counters and customer counters are additive
//! across sources; the time-like averages, `churn_rate` and
//! `avg_repurchase_cycle` are weighted averages and must be re-derived when
//! rows are combined.
//!
//! All nested maps are ordered so that serializing the same rollup twice
//! yields identical bytes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::order_category::OrderCategory;

/// Orders and revenue for one slice of a breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeStat {
    pub orders: u64,
    pub revenue: f64,
}

impl VolumeStat {
    pub fn add(&mut self, other: &VolumeStat) {
        self.orders += other.orders;
        self.revenue += other.revenue;
    }
}

/// One province of the location distribution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvinceStat {
    pub orders: u64,
    pub revenue: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Keyed by category name (`completed`, `cancelled`, `bomb`, `refunded`).
    pub categories: BTreeMap<String, VolumeStat>,
    pub districts: BTreeMap<String, VolumeStat>,
}

impl ProvinceStat {
    pub fn category(&self, category: OrderCategory) -> VolumeStat {
        self.categories
            .get(category.as_str())
            .copied()
            .unwrap_or_default()
    }
}

/// One entry of a top-N product list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductStat {
    pub sku: String,
    pub name: String,
    pub quantity: f64,
    pub orders: u64,
    pub revenue: f64,
}

/// Ratios derived from a rollup's sums. Always recomputed, never summed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub roi: f64,
    pub profit_margin: f64,
    pub aov: f64,
    pub upt: f64,
    pub take_rate: f64,
    pub completion_rate: f64,
    pub cancellation_rate: f64,
    pub refund_rate: f64,
    pub bomb_rate: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub cpa: f64,
    pub roas: f64,
    pub arpu: f64,
    pub ltv: f64,
    pub retention_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyRollup {
    pub brand_id: i64,
    pub date: NaiveDate,
    /// `None` for the Total row.
    pub source: Option<String>,

    pub net_revenue: f64,
    pub gmv: f64,
    pub cogs: f64,
    pub execution_cost: f64,
    pub ad_spend: f64,
    pub total_cost: f64,
    pub profit: f64,
    pub subsidy_amount: f64,

    pub completed_orders: u64,
    pub cancelled_orders: u64,
    pub bomb_orders: u64,
    pub refunded_orders: u64,
    pub other_orders: u64,
    pub total_orders: u64,
    pub quantity_sold: f64,

    /// Hours from creation to shipment.
    pub avg_processing_time: f64,
    /// Hours from shipment to delivery.
    pub avg_shipping_time: f64,
    /// Hours from creation to delivery.
    pub avg_fulfillment_time: f64,

    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub reach: u64,

    pub new_customers: u64,
    pub returning_customers: u64,
    pub total_customers: u64,
    /// Settled net revenue of first-time buyers.
    pub new_customer_revenue: f64,
    /// Settled net revenue of returning buyers.
    pub returning_customer_revenue: f64,
    /// Provisional order value (the order's own price) of first-time buyers.
    pub new_customer_order_value: f64,
    /// Provisional order value (the order's own price) of returning buyers.
    pub returning_customer_order_value: f64,
    pub churn_rate: f64,
    /// Days since the previous order, averaged over returning buyers.
    pub avg_repurchase_cycle: f64,

    pub hourly_distribution: BTreeMap<u32, u64>,
    pub cancel_reasons: BTreeMap<String, u64>,
    pub payment_methods: BTreeMap<String, u64>,
    pub top_products: Vec<ProductStat>,
    pub top_refunded_products: Vec<ProductStat>,
    pub location_distribution: BTreeMap<String, ProvinceStat>,
    pub purchase_frequency: BTreeMap<String, u64>,
    pub customer_segments: BTreeMap<String, u64>,

    pub ratios: DerivedMetrics,
}

impl DailyRollup {
    /// Zero-valued record, used as the placeholder for days without data.
    pub fn empty(brand_id: i64, date: NaiveDate, source: Option<String>) -> Self {
        DailyRollup {
            brand_id,
            date,
            source,
            hourly_distribution: (0..24).map(|h| (h, 0)).collect(),
            ..Default::default()
        }
    }

    pub fn category_count(&self, category: OrderCategory) -> u64 {
        match category {
            OrderCategory::Completed => self.completed_orders,
            OrderCategory::Cancelled => self.cancelled_orders,
            OrderCategory::Bomb => self.bomb_orders,
            OrderCategory::Refunded => self.refunded_orders,
            OrderCategory::Other => self.other_orders,
        }
    }

    pub fn record_category(&mut self, category: OrderCategory) {
        let counter = match category {
            OrderCategory::Completed => &mut self.completed_orders,
            OrderCategory::Cancelled => &mut self.cancelled_orders,
            OrderCategory::Bomb => &mut self.bomb_orders,
            OrderCategory::Refunded => &mut self.refunded_orders,
            OrderCategory::Other => &mut self.other_orders,
        };
        *counter += 1;
        self.total_orders += 1;
    }

    /// Additive fields by name. These sum exactly across PerSource rows to
    /// the Total row of the same day.
    pub fn additive_fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("net_revenue", self.net_revenue),
            ("gmv", self.gmv),
            ("cogs", self.cogs),
            ("execution_cost", self.execution_cost),
            ("ad_spend", self.ad_spend),
            ("total_cost", self.total_cost),
            ("profit", self.profit),
            ("subsidy_amount", self.subsidy_amount),
            ("completed_orders", self.completed_orders as f64),
            ("cancelled_orders", self.cancelled_orders as f64),
            ("bomb_orders", self.bomb_orders as f64),
            ("refunded_orders", self.refunded_orders as f64),
            ("other_orders", self.other_orders as f64),
            ("total_orders", self.total_orders as f64),
            ("quantity_sold", self.quantity_sold),
            ("impressions", self.impressions as f64),
            ("clicks", self.clicks as f64),
            ("conversions", self.conversions as f64),
            ("reach", self.reach as f64),
            ("new_customers", self.new_customers as f64),
            ("returning_customers", self.returning_customers as f64),
            ("total_customers", self.total_customers as f64),
            ("new_customer_revenue", self.new_customer_revenue),
            ("returning_customer_revenue", self.returning_customer_revenue),
            ("new_customer_order_value", self.new_customer_order_value),
            ("returning_customer_order_value", self.returning_customer_order_value),
        ]
    }

    /// True when nothing was recorded on this row.
    pub fn is_zero(&self) -> bool {
        self.additive_fields().iter().all(|(_, v)| *v == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 3).unwrap()
    }

    #[test]
    fn test_empty_rollup_has_all_hours() {
        let rollup = DailyRollup::empty(1, day(), None);
        assert_eq!(rollup.hourly_distribution.len(), 24);
        assert!(rollup.is_zero());
    }

    #[test]
    fn test_record_category_keeps_total_in_step() {
        let mut rollup = DailyRollup::empty(1, day(), None);
        rollup.record_category(OrderCategory::Bomb);
        rollup.record_category(OrderCategory::Completed);
        rollup.record_category(OrderCategory::Completed);
        assert_eq!(rollup.category_count(OrderCategory::Completed), 2);
        assert_eq!(rollup.bomb_orders, 1);
        assert_eq!(rollup.total_orders, 3);
        assert!(!rollup.is_zero());
    }

    #[test]
    fn test_serialization_is_stable() {
        let mut rollup = DailyRollup::empty(7, day(), Some("shopee".to_string()));
        rollup.cancel_reasons.insert("changed_mind".to_string(), 2);
        rollup.cancel_reasons.insert("address".to_string(), 1);
        let first = serde_json::to_string(&rollup).unwrap();
        let decoded: DailyRollup = serde_json::from_str(&first).unwrap();
        assert_eq!(decoded, rollup);
        assert_eq!(serde_json::to_string(&decoded).unwrap(), first);
    }
}
