use crate::domain::metrics::round2;
use crate::domain::report::{AnalystId, Opinion, Report, StockId};
use crate::scoring::aggregator::mean;
use crate::scoring::policy::ThresholdSet;
use crate::scoring::prices::PriceSeries;
use chrono::{Months, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

/// Share of the issue-date close a bearish hidden opinion implies.
const BEARISH_TARGET_RATIO: f64 = 0.8;

/// Street view of one stock, read from each covering analyst's latest report
/// in the past year and categorized by hidden conviction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockConsensus {
    pub buy_count: usize,
    pub hold_count: usize,
    pub sell_count: usize,
    /// Mean of the published targets.
    pub average_target_price: Option<f64>,
    /// Mean of the targets implied by hidden conviction: the published target
    /// for bullish, the issue-date close for neutral, 80% of it for bearish.
    pub aims_average_target_price: Option<f64>,
    pub latest_close: Option<i64>,
    /// Percent from the latest close to the hidden-conviction target.
    pub upside_potential: Option<f64>,
    /// Latest reports with a usable conviction.
    pub total_reports: usize,
    /// Analysts with at least one report in the window.
    pub total_analysts: usize,
}

/// Computes the consensus for `stock_id` as of `as_of`. `None` when no analyst
/// has a categorizable latest report in the window.
pub fn stock_consensus<P: PriceSeries>(
    stock_id: StockId,
    reports: &[Report],
    as_of: NaiveDate,
    prices: &P,
    thresholds: &ThresholdSet,
) -> Option<StockConsensus> {
    let since = as_of.checked_sub_months(Months::new(12))?;

    let mut latest: BTreeMap<AnalystId, &Report> = BTreeMap::new();
    for r in reports
        .iter()
        .filter(|r| r.stock_id == stock_id && r.issue_date > since && r.issue_date <= as_of)
    {
        latest
            .entry(r.analyst_id)
            .and_modify(|cur| {
                if (r.issue_date, r.id) > (cur.issue_date, cur.id) {
                    *cur = r;
                }
            })
            .or_insert(r);
    }

    let categorized: Vec<(&Report, Opinion)> = latest
        .values()
        .filter_map(|r| thresholds.category_of(r.hidden_conviction).map(|c| (*r, c)))
        .collect();
    if categorized.is_empty() {
        return None;
    }

    let count = |want: Opinion| categorized.iter().filter(|(_, c)| *c == want).count();

    let average_target_price = mean(categorized.iter().filter_map(|(r, _)| r.target_price).map(|t| t as f64));

    let aims_average_target_price = mean(
        categorized
            .iter()
            .filter_map(|(r, category)| implied_target(r, *category, prices))
            .filter(|t| *t > 0.0),
    );

    let latest_close = prices.close_on_or_before(stock_id, as_of);
    let upside_potential = match (latest_close, aims_average_target_price) {
        (Some(close), Some(target)) if close > 0 && target > 0.0 => {
            Some(round2((target - close as f64) / close as f64 * 100.0))
        }
        _ => None,
    };

    Some(StockConsensus {
        buy_count: count(Opinion::Bullish),
        hold_count: count(Opinion::Neutral),
        sell_count: count(Opinion::Bearish),
        average_target_price,
        aims_average_target_price,
        latest_close,
        upside_potential,
        total_reports: categorized.len(),
        total_analysts: latest.len(),
    })
}

fn implied_target<P: PriceSeries>(r: &Report, category: Opinion, prices: &P) -> Option<f64> {
    match category {
        Opinion::Bullish => r.target_price.map(|t| t as f64),
        Opinion::Neutral => prices
            .close_on_or_before(r.stock_id, r.issue_date)
            .map(|c| c as f64),
        Opinion::Bearish => prices
            .close_on_or_before(r.stock_id, r.issue_date)
            .map(|c| c as f64 * BEARISH_TARGET_RATIO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::fixtures::{date, report};
    use crate::domain::report::PricePoint;
    use crate::scoring::prices::PriceBook;

    fn prices(points: &[(NaiveDate, i64)]) -> PriceBook {
        points
            .iter()
            .map(|&(trade_date, close_price)| PricePoint {
                stock_id: 1,
                trade_date,
                close_price,
            })
            .collect()
    }

    fn as_of() -> NaiveDate {
        date(2025, 6, 30)
    }

    #[test]
    fn counts_latest_report_per_analyst() {
        let reports = vec![
            // Analyst 1 turned bearish on their latest report.
            report(1, 1, 1, date(2025, 1, 10), 0.9, Some(60_000)),
            report(2, 1, 1, date(2025, 5, 10), 0.1, Some(40_000)),
            report(3, 2, 1, date(2025, 3, 10), 0.9, Some(60_000)),
            report(4, 3, 1, date(2025, 4, 10), 0.5, Some(52_000)),
            // Other stock.
            report(5, 4, 2, date(2025, 4, 10), 0.9, Some(10_000)),
        ];
        let book = prices(&[(date(2025, 1, 2), 50_000)]);

        let c = stock_consensus(1, &reports, as_of(), &book, &ThresholdSet::default()).unwrap();
        assert_eq!((c.buy_count, c.hold_count, c.sell_count), (1, 1, 1));
        assert_eq!(c.total_reports, 3);
        assert_eq!(c.total_analysts, 3);
        assert_eq!(c.average_target_price.map(round2), Some(50_666.67));
    }

    #[test]
    fn implied_targets_follow_hidden_category() {
        let reports = vec![
            report(1, 1, 1, date(2025, 3, 3), 0.9, Some(66_000)),
            report(2, 2, 1, date(2025, 3, 3), 0.5, Some(70_000)),
            report(3, 3, 1, date(2025, 3, 3), 0.1, Some(70_000)),
        ];
        // Issue date is a Monday; the Friday close is the one used.
        let book = prices(&[(date(2025, 2, 28), 50_000), (date(2025, 6, 27), 55_000)]);

        let c = stock_consensus(1, &reports, as_of(), &book, &ThresholdSet::default()).unwrap();
        // (66_000 + 50_000 + 40_000) / 3
        assert_eq!(c.aims_average_target_price, Some(52_000.0));
        assert_eq!(c.latest_close, Some(55_000));
        assert_eq!(c.upside_potential, Some(-5.45));
    }

    #[test]
    fn no_close_leaves_price_dependent_fields_empty() {
        let reports = vec![
            report(1, 1, 1, date(2025, 3, 3), 0.5, Some(70_000)),
            report(2, 2, 1, date(2025, 3, 3), 0.1, None),
        ];
        let c = stock_consensus(1, &reports, as_of(), &PriceBook::new(), &ThresholdSet::default()).unwrap();
        assert_eq!((c.hold_count, c.sell_count), (1, 1));
        assert_eq!(c.average_target_price, Some(70_000.0));
        assert_eq!(c.aims_average_target_price, None);
        assert_eq!(c.latest_close, None);
        assert_eq!(c.upside_potential, None);
    }

    #[test]
    fn window_excludes_old_and_future_reports() {
        let reports = vec![
            report(1, 1, 1, date(2024, 6, 30), 0.9, Some(60_000)),
            report(2, 2, 1, date(2025, 7, 1), 0.9, Some(60_000)),
        ];
        let book = prices(&[(date(2024, 6, 28), 50_000)]);
        assert_eq!(stock_consensus(1, &reports, as_of(), &book, &ThresholdSet::default()), None);

        let mut inside = reports.clone();
        inside[0].issue_date = date(2024, 7, 1);
        let c = stock_consensus(1, &inside, as_of(), &book, &ThresholdSet::default()).unwrap();
        assert_eq!(c.buy_count, 1);
        assert_eq!(c.total_analysts, 1);
    }

    #[test]
    fn reports_without_conviction_do_not_count() {
        let mut r = report(1, 1, 1, date(2025, 3, 3), 0.9, Some(60_000));
        r.hidden_conviction = None;
        let book = prices(&[(date(2025, 2, 28), 50_000)]);
        assert_eq!(stock_consensus(1, &[r.clone()], as_of(), &book, &ThresholdSet::default()), None);

        let other = report(2, 2, 1, date(2025, 3, 3), 0.9, Some(62_000));
        let c = stock_consensus(1, &[r, other], as_of(), &book, &ThresholdSet::default()).unwrap();
        assert_eq!(c.total_reports, 1);
        assert_eq!(c.total_analysts, 2);
        assert_eq!(c.upside_potential, Some(24.0));
    }
}
