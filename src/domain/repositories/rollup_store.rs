use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::entities::rollup::DailyRollup;
use crate::domain::repositories::record_store::StoreResult;

/// Rows written and deleted by one `replace_day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RollupWriteStats {
    pub rows_written: u64,
    pub rows_deleted: u64,
}

/// Storage of the Total and PerSource rollup families.
///
/// Rows are written only by the rollup builder through `replace_day`; every
/// other component reads.
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Atomically make the stored rows for `(brand_id, date)` equal to
    /// `total` and `per_source`: upsert the given rows and delete every other
    /// row of that key. Either all changes are committed or none are.
    async fn replace_day(
        &self,
        brand_id: i64,
        date: NaiveDate,
        total: Option<&DailyRollup>,
        per_source: &[DailyRollup],
    ) -> StoreResult<RollupWriteStats>;

    /// Total rows in `[start, end]`, ascending by date.
    async fn total_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyRollup>>;

    /// PerSource rows for `sources` in `[start, end]`, ascending by date then
    /// source.
    async fn source_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        sources: &[String],
    ) -> StoreResult<Vec<DailyRollup>>;

    /// Distinct sources with PerSource rows in `[start, end]`, sorted.
    async fn sources_in_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<String>>;

    /// Delete both row families in `[start, end]`. Returns rows removed.
    async fn delete_range(&self, brand_id: i64, start: NaiveDate, end: NaiveDate)
        -> StoreResult<u64>;
}
