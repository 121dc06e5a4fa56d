//! Rollup Repository
//!
//! Storage of the Total (`daily_kpi_total`) and PerSource (`daily_kpi_source`)
//! rollup families. The typed rollup is kept as JSON in `data`; `net_revenue`
//! and `total_orders` are duplicated as columns for ad-hoc inspection.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info};

use super::models::RollupRecord;
use super::{query_error, DbPool};
use crate::domain::entities::rollup::DailyRollup;
use crate::domain::errors::StoreError;
use crate::domain::repositories::record_store::StoreResult;
use crate::domain::repositories::rollup_store::{RollupStore, RollupWriteStats};

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn decode_rows(rows: Vec<RollupRecord>) -> StoreResult<Vec<DailyRollup>> {
    rows.into_iter().map(DailyRollup::try_from).collect()
}

/// SQLite-backed rollup store
pub struct SqliteRollupStore {
    pool: DbPool,
}

impl SqliteRollupStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RollupStore for SqliteRollupStore {
    async fn replace_day(
        &self,
        brand_id: i64,
        date: NaiveDate,
        total: Option<&DailyRollup>,
        per_source: &[DailyRollup],
    ) -> StoreResult<RollupWriteStats> {
        let mut stats = RollupWriteStats::default();

        let total_data = total.map(serde_json::to_string).transpose()?;
        let mut source_rows = Vec::with_capacity(per_source.len());
        for rollup in per_source {
            let source = rollup.source.clone().ok_or_else(|| {
                StoreError::Serialization(format!(
                    "PerSource rollup for brand {} on {} has no source",
                    brand_id, date
                ))
            })?;
            source_rows.push((source, serde_json::to_string(rollup)?, rollup));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin rollup write", e))?;

        match (total, total_data) {
            (Some(rollup), Some(data)) => {
                sqlx::query(
                    r#"
                    INSERT INTO daily_kpi_total (brand_id, date, net_revenue, total_orders, data)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(brand_id, date) DO UPDATE SET
                        net_revenue = excluded.net_revenue,
                        total_orders = excluded.total_orders,
                        data = excluded.data
                    "#,
                )
                .bind(brand_id)
                .bind(date)
                .bind(rollup.net_revenue)
                .bind(saturating_i64(rollup.total_orders))
                .bind(data)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_error("Failed to upsert total rollup", e))?;
                stats.rows_written += 1;
            }
            _ => {
                stats.rows_deleted += sqlx::query(
                    "DELETE FROM daily_kpi_total WHERE brand_id = ?1 AND date = ?2",
                )
                .bind(brand_id)
                .bind(date)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_error("Failed to delete total rollup", e))?
                .rows_affected();
            }
        }

        for (source, data, rollup) in &source_rows {
            sqlx::query(
                r#"
                INSERT INTO daily_kpi_source (brand_id, date, source, net_revenue, total_orders, data)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(brand_id, date, source) DO UPDATE SET
                    net_revenue = excluded.net_revenue,
                    total_orders = excluded.total_orders,
                    data = excluded.data
                "#,
            )
            .bind(brand_id)
            .bind(date)
            .bind(source)
            .bind(rollup.net_revenue)
            .bind(saturating_i64(rollup.total_orders))
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to upsert source rollup", e))?;
            stats.rows_written += 1;
        }

        // Sources that no longer contribute to this day
        let mut stale: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM daily_kpi_source WHERE brand_id = ");
        stale.push_bind(brand_id);
        stale.push(" AND date = ");
        stale.push_bind(date);
        if !source_rows.is_empty() {
            stale.push(" AND source NOT IN (");
            let mut kept = stale.separated(", ");
            for (source, _, _) in &source_rows {
                kept.push_bind(source.as_str());
            }
            stale.push(")");
        }
        stats.rows_deleted += stale
            .build()
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to delete stale source rollups", e))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit rollup write", e))?;

        debug!(
            brand_id,
            %date,
            rows_written = stats.rows_written,
            rows_deleted = stats.rows_deleted,
            "Replaced daily rollups"
        );
        Ok(stats)
    }

    async fn total_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyRollup>> {
        let rows = sqlx::query_as::<_, RollupRecord>(
            r#"
            SELECT data FROM daily_kpi_total
            WHERE brand_id = ?1 AND date >= ?2 AND date <= ?3
            ORDER BY date
            "#,
        )
        .bind(brand_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to load total rollups", e))?;

        decode_rows(rows)
    }

    async fn source_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        sources: &[String],
    ) -> StoreResult<Vec<DailyRollup>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT data FROM daily_kpi_source WHERE brand_id = ");
        builder.push_bind(brand_id);
        builder.push(" AND date >= ");
        builder.push_bind(start);
        builder.push(" AND date <= ");
        builder.push_bind(end);
        builder.push(" AND source IN (");
        let mut wanted = builder.separated(", ");
        for source in sources {
            wanted.push_bind(source);
        }
        builder.push(") ORDER BY date, source");

        let rows = builder
            .build_query_as::<RollupRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to load source rollups", e))?;

        decode_rows(rows)
    }

    async fn sources_in_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT source FROM daily_kpi_source
            WHERE brand_id = ?1 AND date >= ?2 AND date <= ?3
            ORDER BY source
            "#,
        )
        .bind(brand_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list rollup sources", e))?;

        Ok(rows.into_iter().map(|(source,)| source).collect())
    }

    async fn delete_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin rollup purge", e))?;

        let mut removed = 0;
        for table in ["daily_kpi_total", "daily_kpi_source"] {
            let sql = format!(
                "DELETE FROM {} WHERE brand_id = ?1 AND date >= ?2 AND date <= ?3",
                table
            );
            removed += sqlx::query(&sql)
                .bind(brand_id)
                .bind(start)
                .bind(end)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_error("Failed to purge rollups", e))?
                .rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit rollup purge", e))?;

        info!(brand_id, %start, %end, removed, "Purged rollup rows");
        Ok(removed)
    }
}
