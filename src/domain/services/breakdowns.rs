//! Helpers for the nested breakdown structures shared by the rollup builder
//! and the merge aggregator.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::ProvinceCoordinates;
use crate::domain::entities::rollup::{ProductStat, ProvinceStat, VolumeStat};

pub const UNKNOWN_PROVINCE: &str = "Unknown";

/// Add `value` under `key`, treating a missing key as zero.
pub fn add_count<K: Ord + Clone>(map: &mut BTreeMap<K, u64>, key: &K, value: u64) {
    *map.entry(key.clone()).or_insert(0) += value;
}

/// Fold `stat` into a product table keyed by sku. Numeric fields are summed;
/// the first non-empty name is kept.
pub fn add_product(table: &mut BTreeMap<String, ProductStat>, stat: &ProductStat) {
    let entry = table.entry(stat.sku.clone()).or_insert_with(|| ProductStat {
        sku: stat.sku.clone(),
        ..Default::default()
    });
    entry.quantity += stat.quantity;
    entry.orders += stat.orders;
    entry.revenue += stat.revenue;
    if entry.name.is_empty() && !stat.name.is_empty() {
        entry.name = stat.name.clone();
    }
}

/// Sort by quantity descending (sku ascending on ties) and keep `top_n`.
pub fn rank_products(table: BTreeMap<String, ProductStat>, top_n: usize) -> Vec<ProductStat> {
    let mut ranked: Vec<ProductStat> = table.into_values().collect();
    ranked.sort_by(|a, b| {
        b.quantity
            .partial_cmp(&a.quantity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.sku.cmp(&b.sku))
    });
    ranked.truncate(top_n);
    ranked
}

/// Deep-merge one province into a location table. Coordinates come from the
/// reference table when it knows the province, otherwise from the first
/// record carrying them.
pub fn add_province(
    table: &mut BTreeMap<String, ProvinceStat>,
    province: &str,
    stat: &ProvinceStat,
    coordinates: &ProvinceCoordinates,
) {
    let entry = table.entry(province.to_string()).or_default();
    entry.orders += stat.orders;
    entry.revenue += stat.revenue;

    for (category, volume) in &stat.categories {
        entry.categories.entry(category.clone()).or_default().add(volume);
    }
    for (district, volume) in &stat.districts {
        entry.districts.entry(district.clone()).or_default().add(volume);
    }

    match coordinates.lookup(province) {
        Some((lat, lng)) => {
            entry.latitude = Some(lat);
            entry.longitude = Some(lng);
        }
        None => {
            if entry.latitude.is_none() && entry.longitude.is_none() {
                entry.latitude = stat.latitude;
                entry.longitude = stat.longitude;
            }
        }
    }
}

/// Purchase-frequency bucket for a buyer's lifetime order count.
pub fn frequency_bucket(lifetime_orders: u64) -> &'static str {
    match lifetime_orders {
        0 | 1 => "1",
        2 => "2",
        3 => "3",
        4 => "4",
        _ => "5+",
    }
}

/// Customer segment for a buyer, from prior and lifetime order counts.
pub fn customer_segment(prior_orders: u64, lifetime_orders: u64) -> &'static str {
    if prior_orders == 0 {
        "new"
    } else if lifetime_orders <= 3 {
        "returning"
    } else if lifetime_orders <= 9 {
        "loyal"
    } else {
        "champion"
    }
}

/// Single-order contribution to a province, with its category and district.
pub fn province_contribution(
    category: Option<&str>,
    district: &str,
    revenue: f64,
) -> ProvinceStat {
    let volume = VolumeStat { orders: 1, revenue };
    let mut stat = ProvinceStat {
        orders: 1,
        revenue,
        ..Default::default()
    };
    if let Some(category) = category {
        stat.categories.insert(category.to_string(), volume);
    }
    if !district.is_empty() {
        stat.districts.insert(district.to_string(), volume);
    }
    stat
}
