use std::collections::{BTreeMap, BTreeSet};

use crate::domain::entities::raw_records::{OrderKey, RawRevenueTransaction};

/// Settled figures per order, built from the revenue transactions linked to
/// one day's orders. Orders are keyed by `(source, order_code)`. Every map is
/// always present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionIndex {
    pub revenue_map: BTreeMap<OrderKey, f64>,
    pub fees_map: BTreeMap<OrderKey, f64>,
    pub gmv_map: BTreeMap<OrderKey, f64>,
    pub refunded_set: BTreeSet<OrderKey>,
    pub refund_tracking_map: BTreeMap<OrderKey, String>,
}

impl TransactionIndex {
    /// Index transactions by order. A transaction marks its order as
    /// refunded when `refund_amount < -refund_epsilon`.
    pub fn build(transactions: &[RawRevenueTransaction], refund_epsilon: f64) -> Self {
        let mut index = TransactionIndex::default();

        for tx in transactions {
            let key = tx.order_key();
            *index.revenue_map.entry(key.clone()).or_insert(0.0) += tx.net_revenue;
            *index.fees_map.entry(key.clone()).or_insert(0.0) += tx.total_fees.abs();
            *index.gmv_map.entry(key.clone()).or_insert(0.0) += tx.gmv;

            if tx.refund_amount < -refund_epsilon {
                index.refunded_set.insert(key.clone());
            }

            if let Some(tracking) = tx.return_tracking_code.as_deref() {
                let tracking = tracking.trim();
                if !tracking.is_empty() {
                    index
                        .refund_tracking_map
                        .entry(key)
                        .or_insert_with(|| tracking.to_string());
                }
            }
        }

        index
    }

    pub fn has_refund(&self, order: &OrderKey) -> bool {
        self.refunded_set.contains(order)
    }

    pub fn net_revenue(&self, order: &OrderKey) -> f64 {
        self.revenue_map.get(order).copied().unwrap_or(0.0)
    }

    pub fn gmv(&self, order: &OrderKey) -> f64 {
        self.gmv_map.get(order).copied().unwrap_or(0.0)
    }

    pub fn fees(&self, order: &OrderKey) -> f64 {
        self.fees_map.get(order).copied().unwrap_or(0.0)
    }
}
