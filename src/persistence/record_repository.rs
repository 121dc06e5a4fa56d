//! Record Repository
//!
//! Read access to raw marketplace records for the rollup builder, plus the
//! ingestion-side writes used by importers and tests.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::models::*;
use super::{query_error, DbPool};
use crate::domain::entities::raw_records::{
    normalize_username, Brand, BuyerHistory, BuyerKey, CustomerLocation, OrderKey,
    RawMarketingSpend, RawOrder, RawRevenueTransaction,
};
use crate::domain::repositories::record_store::{RecordStore, StoreResult};
use crate::domain::value_objects::source_filter::normalize_source;

// Numeric columns are cast on read: SQLite keeps non-numeric text written to a
// REAL or INTEGER column as TEXT, which would fail to decode. The cast turns it
// into 0 (or its leading number) and leaves NULL as NULL.
const ORDER_COLUMNS: &str = "brand_id, source, order_code, created_at, status, shipped_at, \
     delivered_at, payload, CAST(cogs AS REAL) AS cogs, \
     CAST(original_price AS REAL) AS original_price, \
     CAST(subsidy_amount AS REAL) AS subsidy_amount, buyer_username";

const TRANSACTION_COLUMNS: &str = "brand_id, source, order_code, transaction_date, \
     CAST(net_revenue AS REAL) AS net_revenue, CAST(gmv AS REAL) AS gmv, \
     CAST(total_fees AS REAL) AS total_fees, CAST(refund_amount AS REAL) AS refund_amount, \
     return_tracking_code";

const MARKETING_COLUMNS: &str = "brand_id, source, date, CAST(ad_spend AS REAL) AS ad_spend, \
     CAST(impressions AS INTEGER) AS impressions, CAST(clicks AS INTEGER) AS clicks, \
     CAST(conversions AS INTEGER) AS conversions, CAST(reach AS INTEGER) AS reach";

fn day_bounds(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(NaiveTime::MIN);
    (start, start + Duration::days(1))
}

/// SQLite-backed record store
pub struct SqliteRecordStore {
    pool: DbPool,
}

impl SqliteRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a brand, or rename it if it exists
    pub async fn insert_brand(&self, brand: &Brand) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO brands (id, name) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(brand.id)
        .bind(&brand.name)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert brand", e))?;

        debug!("Saved brand: {} ({})", brand.id, brand.name);
        Ok(())
    }

    /// Insert or replace a customer directory entry
    pub async fn upsert_customer(
        &self,
        brand_id: i64,
        customer: &CustomerLocation,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (brand_id, username, province, district)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(brand_id, username) DO UPDATE SET
                province = excluded.province,
                district = excluded.district
            "#,
        )
        .bind(brand_id)
        .bind(normalize_username(&customer.username))
        .bind(&customer.province)
        .bind(&customer.district)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to upsert customer", e))?;

        Ok(())
    }

    /// Insert an order; a re-import of the same `(source, order_code)`
    /// replaces it
    pub async fn insert_order(&self, order: &RawOrder) -> StoreResult<()> {
        let payload = serde_json::to_string(&order.payload)?;

        sqlx::query(
            r#"
            INSERT INTO raw_orders (
                brand_id, source, order_code, created_at, status, shipped_at,
                delivered_at, payload, cogs, original_price, subsidy_amount, buyer_username
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(brand_id, source, order_code) DO UPDATE SET
                created_at = excluded.created_at,
                status = excluded.status,
                shipped_at = excluded.shipped_at,
                delivered_at = excluded.delivered_at,
                payload = excluded.payload,
                cogs = excluded.cogs,
                original_price = excluded.original_price,
                subsidy_amount = excluded.subsidy_amount,
                buyer_username = excluded.buyer_username
            "#,
        )
        .bind(order.brand_id)
        .bind(normalize_source(&order.source))
        .bind(&order.order_code)
        .bind(order.created_at)
        .bind(&order.status)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .bind(payload)
        .bind(order.cogs)
        .bind(order.original_price)
        .bind(order.subsidy_amount)
        .bind(normalize_username(&order.buyer_username))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert order", e))?;

        debug!(
            brand_id = order.brand_id,
            order_code = %order.order_code,
            "Saved raw order"
        );
        Ok(())
    }

    pub async fn insert_transaction(&self, tx: &RawRevenueTransaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_revenue_transactions (
                brand_id, source, order_code, transaction_date, net_revenue,
                gmv, total_fees, refund_amount, return_tracking_code
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(tx.brand_id)
        .bind(normalize_source(&tx.source))
        .bind(&tx.order_code)
        .bind(tx.transaction_date)
        .bind(tx.net_revenue)
        .bind(tx.gmv)
        .bind(tx.total_fees)
        .bind(tx.refund_amount)
        .bind(&tx.return_tracking_code)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert revenue transaction", e))?;

        Ok(())
    }

    pub async fn insert_marketing_spend(&self, spend: &RawMarketingSpend) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_marketing_spend (
                brand_id, source, date, ad_spend, impressions, clicks, conversions, reach
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(spend.brand_id)
        .bind(normalize_source(&spend.source))
        .bind(spend.date)
        .bind(spend.ad_spend)
        .bind(saturating_i64(spend.impressions))
        .bind(saturating_i64(spend.clicks))
        .bind(saturating_i64(spend.conversions))
        .bind(saturating_i64(spend.reach))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert marketing spend", e))?;

        Ok(())
    }

    /// Delete raw orders created in `[start, end]`, their linked transactions
    /// and the marketing spend of those days. Returns rows removed.
    pub async fn purge_raw_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<u64> {
        let (from, _) = day_bounds(start);
        let (_, until) = day_bounds(end);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin purge", e))?;

        let transactions = sqlx::query(
            r#"
            DELETE FROM raw_revenue_transactions
            WHERE brand_id = ?1 AND (source, order_code) IN (
                SELECT source, order_code FROM raw_orders
                WHERE brand_id = ?1 AND created_at >= ?2 AND created_at < ?3
            )
            "#,
        )
        .bind(brand_id)
        .bind(from)
        .bind(until)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_error("Failed to purge revenue transactions", e))?
        .rows_affected();

        let orders = sqlx::query(
            "DELETE FROM raw_orders WHERE brand_id = ?1 AND created_at >= ?2 AND created_at < ?3",
        )
        .bind(brand_id)
        .bind(from)
        .bind(until)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_error("Failed to purge raw orders", e))?
        .rows_affected();

        let marketing = sqlx::query(
            "DELETE FROM raw_marketing_spend WHERE brand_id = ?1 AND date >= ?2 AND date <= ?3",
        )
        .bind(brand_id)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_error("Failed to purge marketing spend", e))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit purge", e))?;

        let removed = transactions + orders + marketing;
        debug!(brand_id, %start, %end, removed, "Purged raw records");
        Ok(removed)
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_brand(&self, brand_id: i64) -> StoreResult<Option<Brand>> {
        let record = sqlx::query_as::<_, BrandRecord>("SELECT id, name FROM brands WHERE id = ?1")
            .bind(brand_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("Failed to get brand", e))?;

        Ok(record.map(Brand::from))
    }

    async fn list_brands(&self) -> StoreResult<Vec<Brand>> {
        let records = sqlx::query_as::<_, BrandRecord>("SELECT id, name FROM brands ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to list brands", e))?;

        Ok(records.into_iter().map(Brand::from).collect())
    }

    async fn orders_created_on(&self, brand_id: i64, date: NaiveDate) -> StoreResult<Vec<RawOrder>> {
        let (from, until) = day_bounds(date);
        let sql = format!(
            "SELECT {} FROM raw_orders \
             WHERE brand_id = ?1 AND created_at >= ?2 AND created_at < ?3 \
             ORDER BY created_at, order_code",
            ORDER_COLUMNS
        );

        let records = sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(brand_id)
            .bind(from)
            .bind(until)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to load orders", e))?;

        Ok(records.into_iter().map(RawOrder::from).collect())
    }

    async fn transactions_for_orders(
        &self,
        brand_id: i64,
        orders: &[OrderKey],
    ) -> StoreResult<Vec<RawRevenueTransaction>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM raw_revenue_transactions WHERE brand_id = ",
            TRANSACTION_COLUMNS
        ));
        builder.push_bind(brand_id);
        builder.push(" AND (source, order_code) IN (");
        builder.push_values(orders, |mut row, order| {
            row.push_bind(order.source.as_str())
                .push_bind(order.order_code.as_str());
        });
        builder.push(") ORDER BY source, order_code, id");

        let records = builder
            .build_query_as::<TransactionRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to load revenue transactions", e))?;

        Ok(records.into_iter().map(RawRevenueTransaction::from).collect())
    }

    async fn marketing_on(
        &self,
        brand_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<RawMarketingSpend>> {
        let sql = format!(
            "SELECT {} FROM raw_marketing_spend WHERE brand_id = ?1 AND date = ?2 ORDER BY source, id",
            MARKETING_COLUMNS
        );
        let records = sqlx::query_as::<_, MarketingRecord>(&sql)
            .bind(brand_id)
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to load marketing spend", e))?;

        Ok(records.into_iter().map(RawMarketingSpend::from).collect())
    }

    async fn customers_by_username(
        &self,
        brand_id: i64,
        usernames: &[String],
    ) -> StoreResult<HashMap<String, CustomerLocation>> {
        if usernames.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT TRIM(username) AS username, province, district FROM customers WHERE brand_id = ",
        );
        builder.push_bind(brand_id);
        builder.push(" AND TRIM(username) IN (");
        let mut names = builder.separated(", ");
        for username in usernames {
            names.push_bind(username);
        }
        builder.push(")");

        let records = builder
            .build_query_as::<CustomerRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to load customers", e))?;

        Ok(records
            .into_iter()
            .map(CustomerLocation::from)
            .map(|c| (c.username.clone(), c))
            .collect())
    }

    async fn buyer_history(
        &self,
        brand_id: i64,
        buyers: &[BuyerKey],
        before: NaiveDate,
    ) -> StoreResult<HashMap<BuyerKey, BuyerHistory>> {
        if buyers.is_empty() {
            return Ok(HashMap::new());
        }

        let wanted: HashSet<&BuyerKey> = buyers.iter().collect();
        let usernames: HashSet<&str> = buyers.iter().map(|b| b.username.as_str()).collect();
        let (cutoff, _) = day_bounds(before);

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT source, TRIM(buyer_username) AS buyer_username, COUNT(*) AS prior_orders, \
             MAX(created_at) AS last_order_at \
             FROM raw_orders WHERE brand_id = ",
        );
        builder.push_bind(brand_id);
        builder.push(" AND created_at < ");
        builder.push_bind(cutoff);
        builder.push(" AND TRIM(buyer_username) IN (");
        let mut names = builder.separated(", ");
        for username in usernames {
            names.push_bind(username);
        }
        builder.push(") GROUP BY source, TRIM(buyer_username)");

        let records = builder
            .build_query_as::<BuyerHistoryRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to load buyer history", e))?;

        let history = records
            .into_iter()
            .filter_map(|row| {
                let key = BuyerKey::new(&row.source, &row.buyer_username);
                if !wanted.contains(&key) {
                    return None;
                }
                let entry = BuyerHistory {
                    prior_orders: u64::try_from(row.prior_orders).unwrap_or(0),
                    last_order_at: row.last_order_at(),
                };
                Some((key, entry))
            })
            .collect();

        Ok(history)
    }
}
