//! KPI service: rebuilds daily rollups and answers range queries over them.
//!
//! Reads go through a TTL cache keyed by `(brand, range, sources)`. Any write
//! for a brand drops every cached range of that brand, since ranges overlap
//! arbitrarily. Cache failures are logged and treated as misses.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::KpiConfig;
use crate::domain::entities::order_category::OrderCategory;
use crate::domain::entities::raw_records::{BuyerKey, OrderKey, RawOrder};
use crate::domain::entities::rollup::{DailyRollup, ProductStat, VolumeStat};
use crate::domain::errors::KpiError;
use crate::domain::repositories::kpi_cache::KpiCache;
use crate::domain::repositories::record_store::RecordStore;
use crate::domain::repositories::rollup_store::RollupStore;
use crate::domain::services::derived_metrics;
use crate::domain::services::merge::RollupMerger;
use crate::domain::services::rollup_builder::{DayInputs, RollupBuilder};
use crate::domain::services::time_bucket;
use crate::domain::value_objects::date_range::{DateRange, Granularity};
use crate::domain::value_objects::source_filter::{SourceFilter, SourceStrategy};

/// Label of the synthesized all-sources row in a platform comparison.
pub const OVERALL_SOURCE: &str = "overall";

const CACHE_PREFIX: &str = "kpi_daily";

/// Result of rebuilding one `(brand, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub brand_id: i64,
    pub date: NaiveDate,
    pub rows_written: u64,
    pub rows_deleted: u64,
}

/// Result of rebuilding every day of a range. Each day is an isolated unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeRecomputeReport {
    pub succeeded: Vec<BuildReport>,
    pub failed: Vec<(NaiveDate, KpiError)>,
}

impl RangeRecomputeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One province of a location distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub province: String,
    pub orders: u64,
    pub revenue: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub districts: BTreeMap<String, VolumeStat>,
}

/// Merged, re-derived summary of one source over a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub source: String,
    pub summary: DailyRollup,
}

pub fn cache_key(brand_id: i64, range: &DateRange, filter: &SourceFilter) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        CACHE_PREFIX,
        brand_id,
        range.start(),
        range.end(),
        filter.cache_segment()
    )
}

pub fn brand_cache_prefix(brand_id: i64) -> String {
    format!("{}:{}:", CACHE_PREFIX, brand_id)
}

pub struct KpiService {
    records: Arc<dyn RecordStore>,
    rollups: Arc<dyn RollupStore>,
    cache: Arc<dyn KpiCache>,
    builder: RollupBuilder,
    merger: RollupMerger,
    config: KpiConfig,
    /// Invalidations seen per brand. A range read only fills the cache when
    /// its brand's generation is unchanged since the read began.
    generations: Mutex<HashMap<i64, u64>>,
}

impl KpiService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        rollups: Arc<dyn RollupStore>,
        cache: Arc<dyn KpiCache>,
        config: KpiConfig,
    ) -> Self {
        Self {
            records,
            rollups,
            cache,
            builder: RollupBuilder::new(&config),
            merger: RollupMerger::new(&config),
            config,
            generations: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &KpiConfig {
        &self.config
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Rebuild and atomically replace the Total and PerSource rows of one day.
    pub async fn recompute_day(&self, brand_id: i64, date: NaiveDate) -> Result<BuildReport, KpiError> {
        self.ensure_brand(brand_id).await?;

        let inputs = self.load_day_inputs(brand_id, date).await?;
        let rollups = self.builder.build(&inputs);

        let stats = self
            .rollups
            .replace_day(brand_id, date, rollups.total.as_ref(), &rollups.per_source)
            .await?;

        self.invalidate_brand(brand_id).await;

        info!(
            brand_id,
            %date,
            rows_written = stats.rows_written,
            rows_deleted = stats.rows_deleted,
            "Recomputed daily rollup"
        );

        Ok(BuildReport {
            brand_id,
            date,
            rows_written: stats.rows_written,
            rows_deleted: stats.rows_deleted,
        })
    }

    /// Rebuild every day in `[start, end]`. A failing day is recorded and its
    /// siblings still run.
    pub async fn recompute_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RangeRecomputeReport, KpiError> {
        let range = self.validate_range(start, end)?;
        self.ensure_brand(brand_id).await?;

        let mut report = RangeRecomputeReport::default();
        for date in range.days() {
            match self.recompute_day(brand_id, date).await {
                Ok(built) => report.succeeded.push(built),
                Err(e) => {
                    warn!(brand_id, %date, error = %e, "Daily rollup failed");
                    report.failed.push((date, e));
                }
            }
        }

        info!(
            brand_id,
            %start,
            %end,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Recomputed rollup range"
        );
        Ok(report)
    }

    /// Per-bucket KPI records for `[start, end]`, ascending. Every day (or
    /// week, month) in range is present, zero-filled when empty.
    pub async fn get_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        filter: &SourceFilter,
        granularity: Granularity,
    ) -> Result<Vec<DailyRollup>, KpiError> {
        let range = self.validate_range(start, end)?;
        self.ensure_brand(brand_id).await?;

        let daily = self.cached_daily(brand_id, &range, filter).await?;
        Ok(time_bucket::bucket(&self.merger, daily, granularity))
    }

    /// Best-selling products over the range, by quantity.
    pub async fn get_top_products(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        filter: &SourceFilter,
        limit: usize,
    ) -> Result<Vec<ProductStat>, KpiError> {
        let summary = self.summarize(brand_id, start, end, filter, limit).await?;
        let mut products = summary.top_products;
        products.truncate(limit);
        Ok(products)
    }

    /// Orders and revenue per province over the range, most orders first.
    ///
    /// With a `status_filter`, province figures are that category's
    /// sub-metric and provinces without such orders are left out. District
    /// figures always cover every category.
    pub async fn get_location_distribution(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        status_filter: Option<OrderCategory>,
        filter: &SourceFilter,
    ) -> Result<Vec<LocationEntry>, KpiError> {
        let summary = self
            .summarize(brand_id, start, end, filter, self.config.top_n)
            .await?;

        let mut entries: Vec<LocationEntry> = summary
            .location_distribution
            .into_iter()
            .filter_map(|(province, stat)| {
                let (orders, revenue) = match status_filter {
                    Some(category) => {
                        let volume = stat.category(category);
                        (volume.orders, volume.revenue)
                    }
                    None => (stat.orders, stat.revenue),
                };
                if status_filter.is_some() && orders == 0 {
                    return None;
                }
                Some(LocationEntry {
                    province,
                    orders,
                    revenue,
                    latitude: stat.latitude,
                    longitude: stat.longitude,
                    districts: stat.districts,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.orders.cmp(&a.orders).then_with(|| a.province.cmp(&b.province)));
        Ok(entries)
    }

    /// One merged summary per source plus an `overall` row combining them.
    pub async fn get_platform_comparison(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        filter: &SourceFilter,
    ) -> Result<Vec<PlatformSummary>, KpiError> {
        let range = self.validate_range(start, end)?;
        self.ensure_brand(brand_id).await?;

        let sources = match filter.strategy() {
            SourceStrategy::All => {
                self.rollups
                    .sources_in_range(brand_id, range.start(), range.end())
                    .await?
            }
            SourceStrategy::Empty => Vec::new(),
            SourceStrategy::Filtered(sources) => sources,
        };

        let mut platforms = Vec::with_capacity(sources.len() + 1);
        for source in sources {
            let rows = self
                .rollups
                .source_range(brand_id, range.start(), range.end(), std::slice::from_ref(&source))
                .await?;
            let mut summary =
                self.merger
                    .merge_as(brand_id, range.start(), Some(source.clone()), &rows);
            derived_metrics::apply(&mut summary);
            platforms.push(PlatformSummary { source, summary });
        }

        let per_source: Vec<DailyRollup> = platforms.iter().map(|p| p.summary.clone()).collect();
        let mut overall = self.merger.merge_as(
            brand_id,
            range.start(),
            Some(OVERALL_SOURCE.to_string()),
            &per_source,
        );
        derived_metrics::apply(&mut overall);
        platforms.push(PlatformSummary {
            source: OVERALL_SOURCE.to_string(),
            summary: overall,
        });

        Ok(platforms)
    }

    /// Drop every cached range of the brand after its raw data changed.
    pub async fn notify_raw_data_changed(&self, brand_id: i64) -> u64 {
        self.invalidate_brand(brand_id).await
    }

    /// Delete both rollup families in `[start, end]`.
    pub async fn purge_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<u64, KpiError> {
        let range = self.validate_range(start, end)?;
        self.ensure_brand(brand_id).await?;

        let removed = self
            .rollups
            .delete_range(brand_id, range.start(), range.end())
            .await?;
        self.invalidate_brand(brand_id).await;
        Ok(removed)
    }

    /// Daily records for the range, one per calendar day, ascending.
    pub async fn query_range(
        &self,
        brand_id: i64,
        range: &DateRange,
        filter: &SourceFilter,
    ) -> Result<Vec<DailyRollup>, KpiError> {
        let placeholder = |date: NaiveDate| DailyRollup::empty(brand_id, date, None);

        let daily = match filter.strategy() {
            SourceStrategy::All => {
                let mut by_date: BTreeMap<NaiveDate, DailyRollup> = self
                    .rollups
                    .total_range(brand_id, range.start(), range.end())
                    .await?
                    .into_iter()
                    .map(|r| (r.date, r))
                    .collect();
                range
                    .days()
                    .map(|date| by_date.remove(&date).unwrap_or_else(|| placeholder(date)))
                    .collect()
            }
            SourceStrategy::Empty => range.days().map(placeholder).collect(),
            SourceStrategy::Filtered(sources) => {
                let rows = self
                    .rollups
                    .source_range(brand_id, range.start(), range.end(), &sources)
                    .await?;
                let mut by_date: BTreeMap<NaiveDate, Vec<DailyRollup>> = BTreeMap::new();
                for row in rows {
                    by_date.entry(row.date).or_default().push(row);
                }
                let label = Some(sources.join(","));
                range
                    .days()
                    .map(|date| {
                        let records = by_date.remove(&date).unwrap_or_default();
                        let mut merged =
                            self.merger.merge_as(brand_id, date, label.clone(), &records);
                        derived_metrics::apply(&mut merged);
                        merged
                    })
                    .collect()
            }
        };

        Ok(daily)
    }

    async fn cached_daily(
        &self,
        brand_id: i64,
        range: &DateRange,
        filter: &SourceFilter,
    ) -> Result<Vec<DailyRollup>, KpiError> {
        let key = cache_key(brand_id, range, filter);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<DailyRollup>>(&raw) {
                Ok(daily) => {
                    debug!(cache_key = %key, "Serving range from cache");
                    return Ok(daily);
                }
                Err(e) => warn!(cache_key = %key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(cache_key = %key, error = %e, "Cache read failed, recomputing"),
        }

        let generation = self.generation(brand_id).await;
        let daily = self.query_range(brand_id, range, filter).await?;

        match serde_json::to_string(&daily) {
            Ok(raw) => self.cache_if_current(brand_id, generation, &key, raw).await,
            Err(e) => warn!(cache_key = %key, error = %e, "Range result not cacheable"),
        }

        Ok(daily)
    }

    async fn generation(&self, brand_id: i64) -> u64 {
        self.generations
            .lock()
            .await
            .get(&brand_id)
            .copied()
            .unwrap_or(0)
    }

    /// Store a range result unless the brand was invalidated after
    /// `generation` was read. The lock is held across the write so an
    /// invalidation cannot slip in between the check and the set.
    async fn cache_if_current(&self, brand_id: i64, generation: u64, key: &str, raw: String) {
        let generations = self.generations.lock().await;
        if generations.get(&brand_id).copied().unwrap_or(0) != generation {
            debug!(cache_key = %key, "Brand changed during read, not caching");
            return;
        }
        if let Err(e) = self.cache.set(key, raw, self.config.cache_ttl()).await {
            warn!(cache_key = %key, error = %e, "Cache write failed");
        }
    }

    /// Every day of the range merged into one re-derived record.
    async fn summarize(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        filter: &SourceFilter,
        top_n: usize,
    ) -> Result<DailyRollup, KpiError> {
        let range = self.validate_range(start, end)?;
        self.ensure_brand(brand_id).await?;

        let daily = self.cached_daily(brand_id, &range, filter).await?;
        let mut summary = self
            .merger
            .clone()
            .with_top_n(top_n)
            .merge_as(brand_id, range.start(), None, &daily);
        derived_metrics::apply(&mut summary);
        Ok(summary)
    }

    async fn load_day_inputs(&self, brand_id: i64, date: NaiveDate) -> Result<DayInputs, KpiError> {
        let orders = self.records.orders_created_on(brand_id, date).await?;

        let order_keys: Vec<OrderKey> = orders
            .iter()
            .map(RawOrder::key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let transactions = self
            .records
            .transactions_for_orders(brand_id, &order_keys)
            .await?;
        let marketing = self.records.marketing_on(brand_id, date).await?;

        let buyers: Vec<BuyerKey> = orders
            .iter()
            .map(|o| BuyerKey::new(&o.source, &o.buyer_username))
            .filter(|key| !key.username.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let usernames: Vec<String> = buyers
            .iter()
            .map(|key| key.username.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let customers = self
            .records
            .customers_by_username(brand_id, &usernames)
            .await?;
        let buyer_history = self.records.buyer_history(brand_id, &buyers, date).await?;

        Ok(DayInputs {
            brand_id,
            date,
            orders,
            transactions,
            marketing,
            customers,
            buyer_history,
        })
    }

    fn validate_range(&self, start: NaiveDate, end: NaiveDate) -> Result<DateRange, KpiError> {
        let range = DateRange::new(start, end)?;
        if range.len_days() > self.config.max_range_days {
            return Err(KpiError::RangeTooLarge {
                days: range.len_days(),
                max: self.config.max_range_days,
            });
        }
        Ok(range)
    }

    async fn ensure_brand(&self, brand_id: i64) -> Result<(), KpiError> {
        match self.records.get_brand(brand_id).await? {
            Some(_) => Ok(()),
            None => Err(KpiError::BrandNotFound(brand_id)),
        }
    }

    async fn invalidate_brand(&self, brand_id: i64) -> u64 {
        *self.generations.lock().await.entry(brand_id).or_insert(0) += 1;

        let prefix = brand_cache_prefix(brand_id);
        match self.cache.delete_by_prefix(&prefix).await {
            Ok(removed) => {
                debug!(brand_id, removed, "Invalidated cached ranges");
                removed
            }
            Err(e) => {
                warn!(brand_id, error = %e, "Cache invalidation failed");
                0
            }
        }
    }
}
