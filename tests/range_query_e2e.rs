mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::*;
use seller_kpi::application::services::kpi_service::OVERALL_SOURCE;
use seller_kpi::config::KpiConfig;
use seller_kpi::domain::entities::order_category::OrderCategory;
use seller_kpi::domain::entities::raw_records::CustomerLocation;
use seller_kpi::domain::entities::rollup::DailyRollup;
use seller_kpi::domain::errors::KpiError;
use seller_kpi::domain::repositories::record_store::StoreResult;
use seller_kpi::domain::repositories::rollup_store::{RollupStore, RollupWriteStats};
use seller_kpi::domain::value_objects::date_range::Granularity;
use seller_kpi::domain::value_objects::source_filter::SourceFilter;
use seller_kpi::persistence::rollup_repository::SqliteRollupStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

fn assert_close(actual: f64, expected: f64, field: &str) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "{}: expected {}, got {}",
        field,
        expected,
        actual
    );
}

/// Two marketplaces on 2025-01-03:
/// shopee S1 and S2 from `lan` (Hà Nội directory entry), tiktok T1 shipped
/// to Đà Nẵng and tiktok T2 cancelled with no address.
async fn seed_two_sources(fixture: &Fixture) {
    let records = &fixture.records;

    records
        .upsert_customer(
            BRAND,
            &CustomerLocation {
                username: "lan".to_string(),
                province: "Hà Nội".to_string(),
                district: "Ba Đình".to_string(),
            },
        )
        .await
        .unwrap();

    records
        .insert_order(&with_buyer(
            with_items(
                order("S1", "shopee", "2025-01-03 09:00:00", "Hoàn thành"),
                &[("SKU-A", 2.0), ("SKU-B", 1.0)],
            ),
            "lan",
        ))
        .await
        .unwrap();
    records
        .insert_order(&with_buyer(
            order("S2", "shopee", "2025-01-03 14:00:00", "Hoàn thành"),
            "lan",
        ))
        .await
        .unwrap();
    records
        .insert_order(&shipped_to(
            with_items(
                order("T1", "tiktok", "2025-01-03 10:00:00", "Đã giao"),
                &[("SKU-A", 1.0)],
            ),
            "Đà Nẵng",
            "Hải Châu",
        ))
        .await
        .unwrap();
    records
        .insert_order(&order("T2", "tiktok", "2025-01-03 11:00:00", "Đã hủy"))
        .await
        .unwrap();

    records
        .insert_transaction(&transaction("S1", "shopee", 180_000.0, 200_000.0))
        .await
        .unwrap();
    records
        .insert_transaction(&transaction("S2", "shopee", 50_000.0, 60_000.0))
        .await
        .unwrap();
    records
        .insert_transaction(&transaction("T1", "tiktok", 90_000.0, 100_000.0))
        .await
        .unwrap();

    fixture
        .service
        .recompute_day(BRAND, day("2025-01-03"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_range_is_zero_filled_and_ascending() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;

    let records = fixture
        .service
        .get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await
        .unwrap();

    assert_eq!(records.len(), 5);
    let dates: Vec<_> = records.iter().map(|r| r.date).collect();
    assert_eq!(
        dates,
        vec![
            day("2025-01-01"),
            day("2025-01-02"),
            day("2025-01-03"),
            day("2025-01-04"),
            day("2025-01-05"),
        ]
    );

    for record in &records {
        if record.date == day("2025-01-03") {
            assert!(!record.is_zero());
        } else {
            assert!(record.is_zero(), "{} should be a placeholder", record.date);
            assert_eq!(record.hourly_distribution.len(), 24);
        }
    }

    let populated = &records[2];
    assert_eq!(populated.total_orders, 4);
    assert_close(populated.net_revenue, 320_000.0, "net_revenue");
    assert_eq!(populated.source, None);
}

#[tokio::test]
async fn test_filtered_ranges_merge_selected_sources() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;
    let service = &fixture.service;

    let shopee = service
        .get_range(
            BRAND,
            day("2025-01-03"),
            day("2025-01-03"),
            &SourceFilter::parse(Some(" Shopee ")),
            Granularity::Day,
        )
        .await
        .unwrap();
    assert_eq!(shopee[0].total_orders, 2);
    assert_close(shopee[0].net_revenue, 230_000.0, "shopee net_revenue");
    assert_eq!(shopee[0].source.as_deref(), Some("shopee"));

    let both = service
        .get_range(
            BRAND,
            day("2025-01-03"),
            day("2025-01-03"),
            &SourceFilter::parse(Some("tiktok,shopee")),
            Granularity::Day,
        )
        .await
        .unwrap();
    assert_eq!(both[0].total_orders, 4);
    assert_close(both[0].net_revenue, 320_000.0, "merged net_revenue");
    assert_close(both[0].ratios.cancellation_rate, 0.25, "merged cancellation_rate");
    assert_eq!(both[0].source.as_deref(), Some("shopee,tiktok"));

    let absent = service
        .get_range(
            BRAND,
            day("2025-01-02"),
            day("2025-01-04"),
            &SourceFilter::sources(["lazada"]),
            Granularity::Day,
        )
        .await
        .unwrap();
    assert_eq!(absent.len(), 3);
    assert!(absent.iter().all(|r| r.is_zero()));
}

#[tokio::test]
async fn test_blank_source_list_yields_placeholders() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;

    let records = fixture
        .service
        .get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::parse(Some(" , ")),
            Granularity::Day,
        )
        .await
        .unwrap();

    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.is_zero()));
}

#[tokio::test]
async fn test_week_and_month_buckets() {
    let fixture = setup().await;
    let records = &fixture.records;

    for (code, created, net) in [
        ("W1", "2025-01-03 09:00:00", 100_000.0),
        ("W2", "2025-01-06 09:00:00", 50_000.0),
    ] {
        records
            .insert_order(&order(code, "shopee", created, "Hoàn thành"))
            .await
            .unwrap();
        records
            .insert_transaction(&transaction(code, "shopee", net, net))
            .await
            .unwrap();
    }
    fixture
        .service
        .recompute_range(BRAND, day("2025-01-01"), day("2025-01-07"))
        .await
        .unwrap();

    let weeks = fixture
        .service
        .get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-07"),
            &SourceFilter::All,
            Granularity::Week,
        )
        .await
        .unwrap();
    assert_eq!(weeks.len(), 2);
    assert_eq!(weeks[0].date, day("2024-12-30"));
    assert_eq!(weeks[1].date, day("2025-01-06"));
    assert_close(weeks[0].net_revenue, 100_000.0, "first week");
    assert_close(weeks[1].net_revenue, 50_000.0, "second week");
    assert_close(weeks[0].ratios.aov, 100_000.0, "first week aov");

    let months = fixture
        .service
        .get_range(
            BRAND,
            day("2024-12-30"),
            day("2025-01-07"),
            &SourceFilter::All,
            Granularity::Month,
        )
        .await
        .unwrap();
    assert_eq!(months.len(), 2);
    assert_eq!(months[0].date, day("2024-12-01"));
    assert!(months[0].is_zero());
    assert_eq!(months[1].date, day("2025-01-01"));
    assert_eq!(months[1].completed_orders, 2);
    assert_close(months[1].net_revenue, 150_000.0, "january");
}

#[tokio::test]
async fn test_cache_is_reused_and_invalidated() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;
    let service = &fixture.service;

    let all = SourceFilter::All;
    let query = || {
        service.get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &all,
            Granularity::Day,
        )
    };

    let first = query().await.unwrap();
    assert_eq!(fixture.cache.len().await, 1);
    let second = query().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fixture.cache.stats().await.hits, 1);

    assert_eq!(service.notify_raw_data_changed(BRAND).await, 1);
    assert_eq!(fixture.cache.len().await, 0);

    query().await.unwrap();
    assert_eq!(fixture.cache.len().await, 1);

    fixture
        .records
        .insert_order(&order("LATE", "shopee", "2025-01-04 08:00:00", "Hoàn thành"))
        .await
        .unwrap();
    service.recompute_day(BRAND, day("2025-01-04")).await.unwrap();
    assert_eq!(fixture.cache.len().await, 0, "recompute drops cached ranges");

    let refreshed = query().await.unwrap();
    assert_eq!(refreshed[3].date, day("2025-01-04"));
    assert_eq!(refreshed[3].completed_orders, 1);
}

/// Rollup store that parks the first Total range read after fetching its
/// rows, until the test releases it.
struct GatedRollupStore {
    inner: SqliteRollupStore,
    armed: AtomicBool,
    reading: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl RollupStore for GatedRollupStore {
    async fn replace_day(
        &self,
        brand_id: i64,
        date: NaiveDate,
        total: Option<&DailyRollup>,
        per_source: &[DailyRollup],
    ) -> StoreResult<RollupWriteStats> {
        self.inner.replace_day(brand_id, date, total, per_source).await
    }

    async fn total_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyRollup>> {
        let rows = self.inner.total_range(brand_id, start, end).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reading.notify_one();
            self.release.notified().await;
        }
        Ok(rows)
    }

    async fn source_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        sources: &[String],
    ) -> StoreResult<Vec<DailyRollup>> {
        self.inner.source_range(brand_id, start, end, sources).await
    }

    async fn sources_in_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<String>> {
        self.inner.sources_in_range(brand_id, start, end).await
    }

    async fn delete_range(
        &self,
        brand_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<u64> {
        self.inner.delete_range(brand_id, start, end).await
    }
}

#[tokio::test]
async fn test_read_overlapping_a_recompute_is_not_cached() {
    let reading = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (store_reading, store_release) = (reading.clone(), release.clone());
    let fixture = setup_with(KpiConfig::default(), move |inner| -> Arc<dyn RollupStore> {
        Arc::new(GatedRollupStore {
            inner,
            armed: AtomicBool::new(true),
            reading: store_reading,
            release: store_release,
        })
    })
    .await;

    fixture
        .records
        .insert_order(&order("A", "shopee", "2025-01-03 09:00:00", "Hoàn thành"))
        .await
        .unwrap();
    fixture.service.recompute_day(BRAND, day("2025-01-03")).await.unwrap();

    let service = fixture.service.clone();
    let stale_read = tokio::spawn(async move {
        service
            .get_range(
                BRAND,
                day("2025-01-03"),
                day("2025-01-03"),
                &SourceFilter::All,
                Granularity::Day,
            )
            .await
    });

    // The read has its rows; a recompute lands before it reaches the cache
    reading.notified().await;
    fixture
        .records
        .insert_order(&order("B", "shopee", "2025-01-03 10:00:00", "Hoàn thành"))
        .await
        .unwrap();
    fixture.service.recompute_day(BRAND, day("2025-01-03")).await.unwrap();
    release.notify_one();

    let stale = stale_read.await.unwrap().unwrap();
    assert_eq!(stale[0].total_orders, 1);
    assert_eq!(fixture.cache.len().await, 0, "stale range must not be cached");

    let all = SourceFilter::All;
    let fresh = fixture
        .service
        .get_range(BRAND, day("2025-01-03"), day("2025-01-03"), &all, Granularity::Day)
        .await
        .unwrap();
    assert_eq!(fresh[0].total_orders, 2);
    assert_eq!(fixture.cache.len().await, 1);
}

#[tokio::test]
async fn test_invalid_ranges_are_rejected() {
    let fixture = setup().await;
    let service = &fixture.service;

    let result = service
        .get_range(
            BRAND,
            day("2025-01-05"),
            day("2025-01-01"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await;
    assert_eq!(
        result,
        Err(KpiError::InvalidRange {
            start: day("2025-01-05"),
            end: day("2025-01-01"),
        })
    );

    let result = service
        .get_range(
            BRAND,
            day("2024-01-01"),
            day("2025-01-01"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await;
    assert_eq!(result, Err(KpiError::RangeTooLarge { days: 367, max: 366 }));

    let result = service
        .get_range(
            99,
            day("2025-01-01"),
            day("2025-01-02"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await;
    assert_eq!(result, Err(KpiError::BrandNotFound(99)));
}

#[tokio::test]
async fn test_range_limit_follows_config() {
    let config = KpiConfig {
        max_range_days: 7,
        ..KpiConfig::default()
    };
    let fixture = setup_with(config, |store| -> Arc<dyn RollupStore> { Arc::new(store) }).await;

    let week = fixture
        .service
        .get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-07"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await
        .unwrap();
    assert_eq!(week.len(), 7);

    let result = fixture
        .service
        .get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-08"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await;
    assert_eq!(result, Err(KpiError::RangeTooLarge { days: 8, max: 7 }));
}

#[tokio::test]
async fn test_top_products_over_range() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;

    let products = fixture
        .service
        .get_top_products(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::All,
            2,
        )
        .await
        .unwrap();

    assert_eq!(products.len(), 2);
    assert_eq!(products[0].sku, "SKU-A");
    assert_eq!(products[0].quantity, 3.0);
    assert_eq!(products[0].orders, 2);
    assert_close(
        products[0].revenue,
        200_000.0 * 2.0 / 3.0 + 100_000.0,
        "SKU-A revenue",
    );
    assert_eq!(products[1].quantity, 1.0);

    let tiktok_only = fixture
        .service
        .get_top_products(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::sources(["tiktok"]),
            10,
        )
        .await
        .unwrap();
    assert_eq!(tiktok_only.len(), 1);
    assert_eq!(tiktok_only[0].sku, "SKU-A");
}

#[tokio::test]
async fn test_location_distribution() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;
    let service = &fixture.service;

    let locations = service
        .get_location_distribution(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            None,
            &SourceFilter::All,
        )
        .await
        .unwrap();

    assert_eq!(locations.len(), 3);
    let hanoi = &locations[0];
    assert_eq!(hanoi.province, "Hà Nội");
    assert_eq!(hanoi.orders, 2);
    assert_close(hanoi.revenue, 230_000.0, "Hà Nội revenue");
    assert_eq!(hanoi.latitude, Some(21.0285));
    assert_eq!(hanoi.districts["Ba Đình"].orders, 2);

    let danang = locations.iter().find(|l| l.province == "Đà Nẵng").unwrap();
    assert_eq!(danang.orders, 1);
    assert_close(danang.revenue, 90_000.0, "Đà Nẵng revenue");
    assert_eq!(danang.districts["Hải Châu"].orders, 1);

    let unknown = locations.iter().find(|l| l.province == "Unknown").unwrap();
    assert_eq!(unknown.orders, 1);
    assert_eq!(unknown.latitude, None);
    assert!(unknown.districts.is_empty());

    let cancelled = service
        .get_location_distribution(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            Some(OrderCategory::Cancelled),
            &SourceFilter::All,
        )
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].province, "Unknown");

    let completed = service
        .get_location_distribution(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            Some(OrderCategory::Completed),
            &SourceFilter::All,
        )
        .await
        .unwrap();
    let provinces: Vec<&str> = completed.iter().map(|l| l.province.as_str()).collect();
    assert_eq!(provinces, vec!["Hà Nội", "Đà Nẵng"]);
}

#[tokio::test]
async fn test_platform_comparison() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;
    let service = &fixture.service;

    let platforms = service
        .get_platform_comparison(BRAND, day("2025-01-01"), day("2025-01-05"), &SourceFilter::All)
        .await
        .unwrap();

    let labels: Vec<&str> = platforms.iter().map(|p| p.source.as_str()).collect();
    assert_eq!(labels, vec!["shopee", "tiktok", OVERALL_SOURCE]);

    let shopee = &platforms[0].summary;
    assert_eq!(shopee.total_orders, 2);
    assert_close(shopee.net_revenue, 230_000.0, "shopee net_revenue");
    assert_close(shopee.ratios.completion_rate, 1.0, "shopee completion_rate");

    let tiktok = &platforms[1].summary;
    assert_close(tiktok.ratios.cancellation_rate, 0.5, "tiktok cancellation_rate");

    let overall = &platforms[2].summary;
    assert_eq!(overall.total_orders, 4);
    assert_close(overall.net_revenue, 320_000.0, "overall net_revenue");
    assert_close(overall.ratios.cancellation_rate, 0.25, "overall cancellation_rate");

    let filtered = service
        .get_platform_comparison(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::sources(["tiktok"]),
        )
        .await
        .unwrap();
    let labels: Vec<&str> = filtered.iter().map(|p| p.source.as_str()).collect();
    assert_eq!(labels, vec!["tiktok", OVERALL_SOURCE]);

    let none = service
        .get_platform_comparison(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::parse(Some("")),
        )
        .await
        .unwrap();
    assert_eq!(none.len(), 1);
    assert!(none[0].summary.is_zero());
}

#[tokio::test]
async fn test_purge_range_removes_rollups() {
    let fixture = setup().await;
    seed_two_sources(&fixture).await;
    let service = &fixture.service;

    service
        .get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await
        .unwrap();

    let removed = service
        .purge_range(BRAND, day("2025-01-01"), day("2025-01-05"))
        .await
        .unwrap();
    assert_eq!(removed, 3);
    assert_eq!(fixture.cache.len().await, 0);
    assert!(stored_rows(&fixture.pool).await.is_empty());

    let records = service
        .get_range(
            BRAND,
            day("2025-01-01"),
            day("2025-01-05"),
            &SourceFilter::All,
            Granularity::Day,
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.is_zero()));
}
