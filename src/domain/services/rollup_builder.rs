//! Daily rollup builder.
//!
//! Turns one `(brand, date)`'s raw records into a Total rollup plus one
//! PerSource rollup per source present that day. Building is a pure function
//! of its inputs: the same [`DayInputs`] always yield identical rollups.
//!
//! Financial figures use booking-date attribution: the transactions passed in
//! are those linked to the day's orders, whatever their settlement date.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::{KpiConfig, ProvinceCoordinates};
use crate::domain::entities::order_category::OrderCategory;
use crate::domain::entities::raw_records::{
    normalize_username, BuyerHistory, BuyerKey, CustomerLocation, RawMarketingSpend, RawOrder,
    RawRevenueTransaction,
};
use crate::domain::entities::rollup::{DailyRollup, ProductStat};
use crate::domain::services::breakdowns::{
    add_count, add_product, add_province, customer_segment, frequency_bucket,
    province_contribution, rank_products, UNKNOWN_PROVINCE,
};
use crate::domain::services::classifier::OrderClassifier;
use crate::domain::services::derived_metrics;
use crate::domain::services::tagger::KeywordTagger;
use crate::domain::services::transaction_index::TransactionIndex;
use crate::domain::value_objects::source_filter::normalize_source;

/// Everything the builder reads for one `(brand, date)`.
#[derive(Debug, Clone, Default)]
pub struct DayInputs {
    pub brand_id: i64,
    pub date: NaiveDate,
    /// Orders created on `date`.
    pub orders: Vec<RawOrder>,
    /// Transactions linked to those orders, any transaction date.
    pub transactions: Vec<RawRevenueTransaction>,
    pub marketing: Vec<RawMarketingSpend>,
    /// Customer directory entries keyed by username.
    pub customers: HashMap<String, CustomerLocation>,
    /// Order history strictly before `date` for the day's buyers.
    pub buyer_history: HashMap<BuyerKey, BuyerHistory>,
}

/// Rows produced for one `(brand, date)`. `total` is `None` and `per_source`
/// is empty when no raw record contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayRollups {
    pub total: Option<DailyRollup>,
    pub per_source: Vec<DailyRollup>,
}

impl DayRollups {
    pub fn row_count(&self) -> usize {
        self.per_source.len() + usize::from(self.total.is_some())
    }
}

struct ClassifiedOrder<'a> {
    order: &'a RawOrder,
    source: String,
    category: OrderCategory,
    net_revenue: f64,
    gmv: f64,
}

#[derive(Default)]
struct MeanAccumulator {
    sum: f64,
    count: u64,
}

impl MeanAccumulator {
    fn push_positive(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            if v > 0.0 && v.is_finite() {
                self.sum += v;
                self.count += 1;
            }
        }
    }

    fn mean(&self) -> f64 {
        derived_metrics::safe_div(self.sum, self.count as f64)
    }
}

#[derive(Default)]
struct BuyerDay {
    orders: u64,
    net_revenue: f64,
    order_value: f64,
}

pub struct RollupBuilder {
    classifier: OrderClassifier,
    reason_tagger: KeywordTagger,
    method_tagger: KeywordTagger,
    coordinates: ProvinceCoordinates,
    refund_epsilon: f64,
    top_n: usize,
    churn_window_days: i64,
}

impl RollupBuilder {
    pub fn new(config: &KpiConfig) -> Self {
        RollupBuilder {
            classifier: OrderClassifier::new(&config.classifier),
            reason_tagger: KeywordTagger::new(&config.cancel_reason_tags),
            method_tagger: KeywordTagger::new(&config.payment_method_tags),
            coordinates: config.province_coordinates.clone(),
            refund_epsilon: config.refund_epsilon,
            top_n: config.top_n,
            churn_window_days: config.churn_window_days,
        }
    }

    pub fn build(&self, inputs: &DayInputs) -> DayRollups {
        let index = TransactionIndex::build(&inputs.transactions, self.refund_epsilon);

        let classified: Vec<ClassifiedOrder<'_>> = inputs
            .orders
            .iter()
            .map(|order| {
                let key = order.key();
                ClassifiedOrder {
                    order,
                    category: self.classifier.classify(
                        &order.status,
                        &order.payload.cancel_reason,
                        index.has_refund(&key),
                    ),
                    net_revenue: index.net_revenue(&key),
                    gmv: index.gmv(&key),
                    source: key.source,
                }
            })
            .collect();

        let sources: BTreeSet<String> = classified
            .iter()
            .map(|c| c.source.clone())
            .chain(inputs.transactions.iter().map(|t| normalize_source(&t.source)))
            .chain(inputs.marketing.iter().map(|m| normalize_source(&m.source)))
            .collect();

        let total = self.accumulate(inputs, None, &classified);
        let per_source: Vec<DailyRollup> = sources
            .iter()
            .filter_map(|source| self.accumulate(inputs, Some(source), &classified))
            .collect();

        debug!(
            brand_id = inputs.brand_id,
            date = %inputs.date,
            orders = inputs.orders.len(),
            transactions = inputs.transactions.len(),
            marketing_rows = inputs.marketing.len(),
            refunded_orders = index.refunded_set.len(),
            sources = per_source.len(),
            "Built daily rollups"
        );

        DayRollups { total, per_source }
    }

    fn accumulate(
        &self,
        inputs: &DayInputs,
        scope: Option<&str>,
        classified: &[ClassifiedOrder<'_>],
    ) -> Option<DailyRollup> {
        let in_scope = |source: &str| scope.map_or(true, |s| s == source);

        let orders: Vec<&ClassifiedOrder<'_>> =
            classified.iter().filter(|c| in_scope(&c.source)).collect();
        let transactions: Vec<&RawRevenueTransaction> = inputs
            .transactions
            .iter()
            .filter(|t| in_scope(&normalize_source(&t.source)))
            .collect();
        let marketing: Vec<&RawMarketingSpend> = inputs
            .marketing
            .iter()
            .filter(|m| in_scope(&normalize_source(&m.source)))
            .collect();

        if orders.is_empty() && transactions.is_empty() && marketing.is_empty() {
            return None;
        }

        let mut rollup = DailyRollup::empty(inputs.brand_id, inputs.date, scope.map(String::from));

        for tx in &transactions {
            rollup.net_revenue += tx.net_revenue;
            rollup.gmv += tx.gmv;
            rollup.execution_cost += tx.total_fees.abs();
        }

        for spend in &marketing {
            rollup.ad_spend += spend.ad_spend;
            rollup.impressions += spend.impressions;
            rollup.clicks += spend.clicks;
            rollup.conversions += spend.conversions;
            rollup.reach += spend.reach;
        }

        let mut processing = MeanAccumulator::default();
        let mut shipping = MeanAccumulator::default();
        let mut fulfillment = MeanAccumulator::default();
        let mut sold = BTreeMap::new();
        let mut refunded = BTreeMap::new();
        let mut buyers: BTreeMap<BuyerKey, BuyerDay> = BTreeMap::new();

        for entry in &orders {
            let order = entry.order;
            rollup.record_category(entry.category);
            rollup.subsidy_amount += order.subsidy_amount;
            if !entry.category.is_lost_sale() {
                rollup.cogs += order.cogs;
            }
            if entry.category == OrderCategory::Completed {
                rollup.quantity_sold += order.payload.total_quantity();
            }

            add_count(&mut rollup.hourly_distribution, &order.created_at.hour(), 1);
            add_count(
                &mut rollup.payment_methods,
                &self.method_tagger.tag(&order.payload.payment_method).to_string(),
                1,
            );
            if matches!(entry.category, OrderCategory::Cancelled | OrderCategory::Bomb) {
                add_count(
                    &mut rollup.cancel_reasons,
                    &self.reason_tagger.tag(&order.payload.cancel_reason).to_string(),
                    1,
                );
            }

            processing.push_positive(hours_between(Some(order.created_at), order.shipped_at));
            shipping.push_positive(hours_between(order.shipped_at, order.delivered_at));
            fulfillment.push_positive(hours_between(Some(order.created_at), order.delivered_at));

            let products = if entry.category.is_lost_sale() {
                &mut refunded
            } else {
                &mut sold
            };
            for stat in item_stats(order, entry.gmv) {
                add_product(products, &stat);
            }

            let (province, district) = self.locate(order, &inputs.customers);
            let category = entry
                .category
                .has_location_breakdown()
                .then(|| entry.category.as_str());
            let mut contribution = province_contribution(category, &district, entry.net_revenue);
            if let Some((lat, lng)) = self.coordinates.lookup(&province) {
                contribution.latitude = Some(lat);
                contribution.longitude = Some(lng);
            }
            add_province(
                &mut rollup.location_distribution,
                &province,
                &contribution,
                &self.coordinates,
            );

            let key = BuyerKey::new(&entry.source, &order.buyer_username);
            if !key.username.is_empty() {
                let buyer = buyers.entry(key).or_default();
                buyer.orders += 1;
                buyer.net_revenue += entry.net_revenue;
                buyer.order_value += order.original_price;
            }
        }

        rollup.avg_processing_time = processing.mean();
        rollup.avg_shipping_time = shipping.mean();
        rollup.avg_fulfillment_time = fulfillment.mean();
        rollup.top_products = rank_products(sold, self.top_n);
        rollup.top_refunded_products = rank_products(refunded, self.top_n);

        self.accumulate_customers(&mut rollup, inputs, &buyers);

        rollup.total_cost = rollup.cogs + rollup.execution_cost + rollup.ad_spend;
        rollup.profit = rollup.net_revenue - rollup.cogs - rollup.ad_spend;
        derived_metrics::apply(&mut rollup);

        Some(rollup)
    }

    fn accumulate_customers(
        &self,
        rollup: &mut DailyRollup,
        inputs: &DayInputs,
        buyers: &BTreeMap<BuyerKey, BuyerDay>,
    ) {
        let mut repurchase = MeanAccumulator::default();
        let mut lapsed = 0u64;

        for (key, day) in buyers {
            let history = inputs.buyer_history.get(key).copied().unwrap_or_default();
            let lifetime = history.prior_orders + day.orders;

            if history.is_returning() {
                rollup.returning_customers += 1;
                rollup.returning_customer_revenue += day.net_revenue;
                rollup.returning_customer_order_value += day.order_value;

                if let Some(last) = history.last_order_at {
                    let gap_days = (inputs.date - last.date()).num_days();
                    if gap_days >= 0 {
                        repurchase.sum += gap_days as f64;
                        repurchase.count += 1;
                    }
                    if gap_days > self.churn_window_days {
                        lapsed += 1;
                    }
                }
            } else {
                rollup.new_customers += 1;
                rollup.new_customer_revenue += day.net_revenue;
                rollup.new_customer_order_value += day.order_value;
            }

            add_count(&mut rollup.purchase_frequency, &frequency_bucket(lifetime).to_string(), 1);
            add_count(
                &mut rollup.customer_segments,
                &customer_segment(history.prior_orders, lifetime).to_string(),
                1,
            );
        }

        rollup.total_customers = rollup.new_customers + rollup.returning_customers;
        rollup.avg_repurchase_cycle = repurchase.mean();
        rollup.churn_rate = derived_metrics::safe_div(lapsed as f64, rollup.total_customers as f64);
    }

    /// Province and district of an order: customer directory first, then the
    /// order's own shipping address.
    fn locate(
        &self,
        order: &RawOrder,
        customers: &HashMap<String, CustomerLocation>,
    ) -> (String, String) {
        if let Some(customer) = customers.get(&normalize_username(&order.buyer_username)) {
            if !customer.province.trim().is_empty() {
                return (
                    customer.province.trim().to_string(),
                    customer.district.trim().to_string(),
                );
            }
        }

        let shipping = &order.payload.shipping;
        if !shipping.province.trim().is_empty() {
            return (
                shipping.province.trim().to_string(),
                shipping.district.trim().to_string(),
            );
        }

        (UNKNOWN_PROVINCE.to_string(), String::new())
    }
}

fn hours_between(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Option<f64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).num_seconds() as f64 / 3600.0),
        _ => None,
    }
}

/// Per-item product stats of one order, with the order's settled GMV
/// allocated by quantity.
fn item_stats(order: &RawOrder, order_gmv: f64) -> Vec<ProductStat> {
    let items: Vec<_> = order
        .payload
        .items
        .iter()
        .filter(|item| !item.sku.trim().is_empty() || !item.name.trim().is_empty())
        .collect();
    if items.is_empty() {
        return Vec::new();
    }

    let total_quantity: f64 = items.iter().map(|i| i.quantity).sum();
    let item_count = items.len() as f64;

    items
        .into_iter()
        .map(|item| {
            let share = if total_quantity > 0.0 {
                item.quantity / total_quantity
            } else {
                1.0 / item_count
            };
            let sku = if item.sku.trim().is_empty() {
                item.name.trim()
            } else {
                item.sku.trim()
            };
            ProductStat {
                sku: sku.to_string(),
                name: item.name.trim().to_string(),
                quantity: item.quantity,
                orders: 1,
                revenue: order_gmv * share,
            }
        })
        .collect()
}
