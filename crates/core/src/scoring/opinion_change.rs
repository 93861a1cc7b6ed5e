use crate::domain::report::Report;
use crate::scoring::policy::ThresholdSet;
use chrono::NaiveDate;

/// Scans `stream` (the same analyst's reports on the same stock, oldest first) for
/// the first report after `origin` and before `horizon` whose three-way category
/// differs from the report just before it.
///
/// The first transition ends the evaluation window, even if a later report happens
/// to return to the origin's category.
pub fn find_opinion_change<'a>(
    origin: &Report,
    stream: &'a [Report],
    horizon: NaiveDate,
    thresholds: &ThresholdSet,
) -> Option<&'a Report> {
    let mut previous = thresholds.category_of(origin.hidden_conviction);

    for report in stream {
        debug_assert!(
            report.analyst_id == origin.analyst_id && report.stock_id == origin.stock_id,
            "opinion stream mixes analyst/stock pairs"
        );
        if report.issue_date <= origin.issue_date {
            continue;
        }
        if report.issue_date >= horizon {
            break;
        }

        let current = thresholds.category_of(report.hidden_conviction);
        if current != previous {
            return Some(report);
        }
        previous = current;
    }

    None
}
