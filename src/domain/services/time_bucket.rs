use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::entities::rollup::DailyRollup;
use crate::domain::services::derived_metrics;
use crate::domain::services::merge::RollupMerger;
use crate::domain::value_objects::date_range::Granularity;

/// Regroup daily records into week (Monday) or month (first day) buckets.
///
/// `Day` returns the input unchanged. Buckets are merged, re-derived and
/// returned in ascending order of their representative date.
pub fn bucket(
    merger: &RollupMerger,
    daily: Vec<DailyRollup>,
    granularity: Granularity,
) -> Vec<DailyRollup> {
    if granularity == Granularity::Day {
        return daily;
    }

    let mut groups: BTreeMap<NaiveDate, Vec<DailyRollup>> = BTreeMap::new();
    for record in daily {
        groups
            .entry(granularity.bucket_start(record.date))
            .or_default()
            .push(record);
    }

    debug!(
        granularity = ?granularity,
        buckets = groups.len(),
        "Grouped daily records into buckets"
    );

    groups
        .into_iter()
        .map(|(start, records)| {
            let brand_id = records.first().map(|r| r.brand_id).unwrap_or_default();
            let source = records.first().and_then(|r| r.source.clone());
            let mut merged = merger.merge_as(brand_id, start, source, &records);
            derived_metrics::apply(&mut merged);
            merged
        })
        .collect()
}
