use crate::domain::entities::rollup::{DailyRollup, DerivedMetrics};

/// Division that yields `0.0` for a zero denominator or a non-finite result.
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let value = numerator / denominator;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Compute every ratio of a rollup from its sums.
///
/// Both the rollup builder and the range aggregators call this after filling
/// or merging sums; no ratio is computed anywhere else.
pub fn derive(sums: &DailyRollup) -> DerivedMetrics {
    let total_orders = sums.total_orders as f64;
    let completed = sums.completed_orders as f64;
    let impressions = sums.impressions as f64;
    let clicks = sums.clicks as f64;
    let customers = sums.total_customers as f64;

    DerivedMetrics {
        roi: safe_div(sums.profit, sums.total_cost),
        profit_margin: safe_div(sums.profit, sums.net_revenue),
        aov: safe_div(sums.gmv, completed),
        upt: safe_div(sums.quantity_sold, completed),
        take_rate: safe_div(sums.execution_cost, sums.gmv),
        completion_rate: safe_div(completed, total_orders),
        cancellation_rate: safe_div(sums.cancelled_orders as f64, total_orders),
        refund_rate: safe_div(sums.refunded_orders as f64, total_orders),
        bomb_rate: safe_div(sums.bomb_orders as f64, total_orders),
        ctr: safe_div(clicks, impressions),
        cpc: safe_div(sums.ad_spend, clicks),
        cpm: safe_div(sums.ad_spend, impressions) * 1000.0,
        cpa: safe_div(sums.ad_spend, sums.conversions as f64),
        roas: safe_div(sums.gmv, sums.ad_spend),
        arpu: safe_div(sums.net_revenue, customers),
        ltv: safe_div(sums.profit, customers),
        retention_rate: safe_div(sums.returning_customers as f64, customers),
    }
}

/// Refresh a rollup's ratios in place.
pub fn apply(rollup: &mut DailyRollup) {
    rollup.ratios = derive(rollup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rollup() -> DailyRollup {
        DailyRollup::empty(1, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), None)
    }

    fn all_ratios(m: &DerivedMetrics) -> Vec<f64> {
        vec![
            m.roi, m.profit_margin, m.aov, m.upt, m.take_rate, m.completion_rate,
            m.cancellation_rate, m.refund_rate, m.bomb_rate, m.ctr, m.cpc, m.cpm, m.cpa,
            m.roas, m.arpu, m.ltv, m.retention_rate,
        ]
    }

    #[test]
    fn test_zero_denominators_yield_zero() {
        let mut sums = rollup();
        sums.profit = -500.0;
        sums.gmv = 1000.0;
        sums.ad_spend = 300.0;
        sums.net_revenue = 0.0;
        let metrics = derive(&sums);
        for value in all_ratios(&metrics) {
            assert!(value.is_finite());
        }
        assert_eq!(metrics.profit_margin, 0.0);
        assert_eq!(metrics.aov, 0.0);
        assert_eq!(metrics.cpc, 0.0);
        assert_eq!(metrics.arpu, 0.0);
    }

    #[test]
    fn test_all_zero_rollup_has_zero_ratios() {
        assert_eq!(derive(&rollup()), DerivedMetrics::default());
    }

    #[test]
    fn test_ratio_formulas() {
        let mut sums = rollup();
        sums.profit = 200.0;
        sums.total_cost = 800.0;
        sums.net_revenue = 1000.0;
        sums.gmv = 1200.0;
        sums.execution_cost = 120.0;
        sums.ad_spend = 100.0;
        sums.completed_orders = 4;
        sums.cancelled_orders = 1;
        sums.total_orders = 5;
        sums.quantity_sold = 10.0;
        sums.impressions = 2000;
        sums.clicks = 50;
        sums.conversions = 5;
        sums.total_customers = 4;
        sums.returning_customers = 1;

        let m = derive(&sums);
        assert_eq!(m.roi, 0.25);
        assert_eq!(m.profit_margin, 0.2);
        assert_eq!(m.aov, 300.0);
        assert_eq!(m.upt, 2.5);
        assert_eq!(m.take_rate, 0.1);
        assert_eq!(m.completion_rate, 0.8);
        assert_eq!(m.cancellation_rate, 0.2);
        assert_eq!(m.ctr, 0.025);
        assert_eq!(m.cpc, 2.0);
        assert_eq!(m.cpm, 50.0);
        assert_eq!(m.cpa, 20.0);
        assert_eq!(m.roas, 12.0);
        assert_eq!(m.arpu, 250.0);
        assert_eq!(m.ltv, 50.0);
        assert_eq!(m.retention_rate, 0.25);
    }

    #[test]
    fn test_safe_div_guards_non_finite() {
        assert_eq!(safe_div(1.0, 0.0), 0.0);
        assert_eq!(safe_div(f64::INFINITY, 1.0), 0.0);
        assert_eq!(safe_div(f64::NAN, 2.0), 0.0);
        assert_eq!(safe_div(3.0, 2.0), 1.5);
    }
}
