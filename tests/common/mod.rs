#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use seller_kpi::application::services::kpi_service::KpiService;
use seller_kpi::config::KpiConfig;
use seller_kpi::domain::entities::raw_records::{
    Brand, LineItem, OrderPayload, RawMarketingSpend, RawOrder, RawRevenueTransaction,
    ShippingAddress,
};
use seller_kpi::domain::repositories::kpi_cache::KpiCache;
use seller_kpi::domain::repositories::rollup_store::RollupStore;
use seller_kpi::infrastructure::lru_cache::LruKpiCache;
use seller_kpi::persistence::record_repository::SqliteRecordStore;
use seller_kpi::persistence::rollup_repository::SqliteRollupStore;
use seller_kpi::persistence::{init_database, DatabaseConfig, DbPool};
use std::sync::Arc;

pub const BRAND: i64 = 1;

pub struct Fixture {
    pub pool: DbPool,
    pub records: Arc<SqliteRecordStore>,
    pub cache: Arc<LruKpiCache>,
    pub service: Arc<KpiService>,
}

pub fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

pub fn at(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
}

pub async fn setup() -> Fixture {
    setup_with(KpiConfig::default(), |store| -> Arc<dyn RollupStore> { Arc::new(store) }).await
}

/// Build a fixture whose rollup store is produced by `wrap`.
pub async fn setup_with<F>(config: KpiConfig, wrap: F) -> Fixture
where
    F: FnOnce(SqliteRollupStore) -> Arc<dyn RollupStore>,
{
    let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
    let records = Arc::new(SqliteRecordStore::new(pool.clone()));
    records
        .insert_brand(&Brand {
            id: BRAND,
            name: "Test Brand".to_string(),
        })
        .await
        .unwrap();

    let rollups = wrap(SqliteRollupStore::new(pool.clone()));

    let cache = Arc::new(LruKpiCache::new(config.cache_capacity));
    let cache_handle: Arc<dyn KpiCache> = cache.clone();
    let service = Arc::new(KpiService::new(records.clone(), rollups, cache_handle, config));

    Fixture {
        pool,
        records,
        cache,
        service,
    }
}

pub fn order(code: &str, source: &str, created: &str, status: &str) -> RawOrder {
    RawOrder {
        brand_id: BRAND,
        source: source.to_string(),
        order_code: code.to_string(),
        created_at: at(created),
        status: status.to_string(),
        payload: OrderPayload {
            items: vec![LineItem {
                sku: "SKU-1".to_string(),
                name: "Áo thun".to_string(),
                quantity: 1.0,
            }],
            ..Default::default()
        },
        original_price: 100_000.0,
        cogs: 40_000.0,
        ..Default::default()
    }
}

pub fn with_buyer(mut order: RawOrder, username: &str) -> RawOrder {
    order.buyer_username = username.to_string();
    order
}

pub fn with_reason(mut order: RawOrder, reason: &str) -> RawOrder {
    order.payload.cancel_reason = reason.to_string();
    order
}

pub fn with_items(mut order: RawOrder, items: &[(&str, f64)]) -> RawOrder {
    order.payload.items = items
        .iter()
        .map(|(sku, quantity)| LineItem {
            sku: sku.to_string(),
            name: format!("Product {}", sku),
            quantity: *quantity,
        })
        .collect();
    order
}

pub fn shipped_to(mut order: RawOrder, province: &str, district: &str) -> RawOrder {
    order.payload.shipping = ShippingAddress {
        province: province.to_string(),
        district: district.to_string(),
    };
    order
}

pub fn transaction(code: &str, source: &str, net_revenue: f64, gmv: f64) -> RawRevenueTransaction {
    RawRevenueTransaction {
        brand_id: BRAND,
        source: source.to_string(),
        order_code: code.to_string(),
        net_revenue,
        gmv,
        total_fees: net_revenue - gmv,
        ..Default::default()
    }
}

pub fn marketing(source: &str, date: &str, ad_spend: f64, clicks: u64) -> RawMarketingSpend {
    RawMarketingSpend {
        brand_id: BRAND,
        source: source.to_string(),
        date: day(date),
        ad_spend,
        impressions: clicks * 20,
        clicks,
        conversions: clicks / 10,
        reach: clicks * 15,
    }
}

pub async fn stored_rows(pool: &DbPool) -> Vec<(String, String)> {
    let mut rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT 'total:' || date, data FROM daily_kpi_total \
         UNION ALL SELECT 'source:' || date || ':' || source, data FROM daily_kpi_source",
    )
    .fetch_all(pool)
    .await
    .unwrap();
    rows.sort();
    rows
}
