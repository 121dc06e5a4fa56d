//! Accumulation/merge of rollup-like records.
//!
//! Counters and sums add up. Time-like averages, the repurchase cycle and the
//! churn rate are re-weighted by their volume field instead of being averaged
//! or summed. Ratios are re-derived from the merged sums.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::{KpiConfig, ProvinceCoordinates};
use crate::domain::entities::rollup::DailyRollup;
use crate::domain::services::breakdowns::{add_count, add_product, add_province, rank_products};
use crate::domain::services::derived_metrics;

#[derive(Debug, Clone)]
pub struct RollupMerger {
    top_n: usize,
    coordinates: ProvinceCoordinates,
}

impl RollupMerger {
    pub fn new(config: &KpiConfig) -> Self {
        RollupMerger {
            top_n: config.top_n,
            coordinates: config.province_coordinates.clone(),
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Merge records into one. The result carries the first record's key;
    /// callers re-key it (bucket date, combined source) as needed. An empty
    /// slice yields `None`.
    pub fn merge(&self, records: &[DailyRollup]) -> Option<DailyRollup> {
        let first = records.first()?;
        if records.len() == 1 {
            return Some(first.clone());
        }

        let mut merged = DailyRollup::empty(first.brand_id, first.date, first.source.clone());
        let mut sold = BTreeMap::new();
        let mut refunded = BTreeMap::new();

        for r in records {
            merged.net_revenue += r.net_revenue;
            merged.gmv += r.gmv;
            merged.cogs += r.cogs;
            merged.execution_cost += r.execution_cost;
            merged.ad_spend += r.ad_spend;
            merged.total_cost += r.total_cost;
            merged.profit += r.profit;
            merged.subsidy_amount += r.subsidy_amount;

            merged.completed_orders += r.completed_orders;
            merged.cancelled_orders += r.cancelled_orders;
            merged.bomb_orders += r.bomb_orders;
            merged.refunded_orders += r.refunded_orders;
            merged.other_orders += r.other_orders;
            merged.total_orders += r.total_orders;
            merged.quantity_sold += r.quantity_sold;

            merged.impressions += r.impressions;
            merged.clicks += r.clicks;
            merged.conversions += r.conversions;
            merged.reach += r.reach;

            merged.new_customers += r.new_customers;
            merged.returning_customers += r.returning_customers;
            merged.total_customers += r.total_customers;
            merged.new_customer_revenue += r.new_customer_revenue;
            merged.returning_customer_revenue += r.returning_customer_revenue;
            merged.new_customer_order_value += r.new_customer_order_value;
            merged.returning_customer_order_value += r.returning_customer_order_value;

            for (hour, count) in &r.hourly_distribution {
                add_count(&mut merged.hourly_distribution, hour, *count);
            }
            for (reason, count) in &r.cancel_reasons {
                add_count(&mut merged.cancel_reasons, reason, *count);
            }
            for (method, count) in &r.payment_methods {
                add_count(&mut merged.payment_methods, method, *count);
            }
            for (bucket, count) in &r.purchase_frequency {
                add_count(&mut merged.purchase_frequency, bucket, *count);
            }
            for (segment, count) in &r.customer_segments {
                add_count(&mut merged.customer_segments, segment, *count);
            }
            for product in &r.top_products {
                add_product(&mut sold, product);
            }
            for product in &r.top_refunded_products {
                add_product(&mut refunded, product);
            }
            for (province, stat) in &r.location_distribution {
                add_province(&mut merged.location_distribution, province, stat, &self.coordinates);
            }
        }

        merged.avg_processing_time =
            weighted_mean(records, |r| (r.avg_processing_time, r.total_orders));
        merged.avg_shipping_time =
            weighted_mean(records, |r| (r.avg_shipping_time, r.total_orders));
        merged.avg_fulfillment_time =
            weighted_mean(records, |r| (r.avg_fulfillment_time, r.total_orders));
        merged.avg_repurchase_cycle =
            weighted_mean(records, |r| (r.avg_repurchase_cycle, r.returning_customers));
        merged.churn_rate = weighted_mean(records, |r| (r.churn_rate, r.total_customers));

        merged.top_products = rank_products(sold, self.top_n);
        merged.top_refunded_products = rank_products(refunded, self.top_n);
        derived_metrics::apply(&mut merged);

        Some(merged)
    }

    /// Merge and re-key the result to `date` and `source`. Empty input yields
    /// a zero-valued placeholder.
    pub fn merge_as(
        &self,
        brand_id: i64,
        date: NaiveDate,
        source: Option<String>,
        records: &[DailyRollup],
    ) -> DailyRollup {
        match self.merge(records) {
            Some(mut merged) => {
                merged.brand_id = brand_id;
                merged.date = date;
                merged.source = source;
                merged
            }
            None => DailyRollup::empty(brand_id, date, source),
        }
    }
}

/// Weighted average of `(value, weight)` pairs. With zero total weight, falls
/// back to the plain mean of the non-zero values present, or `0.0`.
fn weighted_mean<F>(records: &[DailyRollup], pick: F) -> f64
where
    F: Fn(&DailyRollup) -> (f64, u64),
{
    let pairs: Vec<(f64, f64)> = records
        .iter()
        .map(|r| {
            let (value, weight) = pick(r);
            (value, weight as f64)
        })
        .filter(|(value, _)| value.is_finite())
        .collect();

    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total_weight > 0.0 {
        let weighted: f64 = pairs.iter().map(|(v, w)| v * w).sum();
        return derived_metrics::safe_div(weighted, total_weight);
    }

    let non_zero: Vec<f64> = pairs
        .iter()
        .map(|(v, _)| *v)
        .filter(|v| *v != 0.0)
        .collect();
    derived_metrics::safe_div(non_zero.iter().sum(), non_zero.len() as f64)
}
