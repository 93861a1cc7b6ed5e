use crate::domain::metrics::EvaluationResult;
use crate::domain::report::{Opinion, Report};
use crate::scoring::policy::{ScoringPolicy, MISMATCH_MIDPOINT};

/// Judges one report against the close on its issue date and the close at the end
/// of its evaluation window.
///
/// Returns `None` when the report cannot be scored: no usable target price, a zero
/// price, or no hidden conviction. Sparse price history makes this common.
pub fn evaluate(
    report: &Report,
    issue_price: i64,
    comparison_price: i64,
    sector: Option<&str>,
    policy: &ScoringPolicy,
) -> Option<EvaluationResult> {
    let target_price = report.target_price.filter(|p| *p != 0)?;
    if issue_price == 0 || comparison_price == 0 {
        return None;
    }
    let conviction = report.hidden_conviction?;
    let category = policy.thresholds.classify3(conviction)?;

    let return_pct = (comparison_price - issue_price) as f64 / issue_price as f64 * 100.0;

    let correct = match category {
        Opinion::Bullish => return_pct > 0.0,
        Opinion::Bearish => return_pct < 0.0,
        Opinion::Neutral => return_pct.abs() <= policy.neutral_band_pct,
    };

    let target_error_pct = if category != Opinion::Bearish
        && !is_opinion_mismatch(report.stated_opinion, conviction)
    {
        Some((target_price - comparison_price).abs() as f64 / target_price as f64 * 100.0)
    } else {
        None
    };

    Some(EvaluationResult {
        correct,
        return_pct,
        target_error_pct,
        sector: sector.map(str::to_string),
    })
}

/// A stated call contradicts the hidden conviction when it names the opposite side
/// of the 0.5 midpoint.
pub fn is_opinion_mismatch(stated: Opinion, conviction: f64) -> bool {
    let hidden_bullish = conviction >= MISMATCH_MIDPOINT;
    match stated {
        Opinion::Bullish => !hidden_bullish,
        Opinion::Bearish => hidden_bullish,
        Opinion::Neutral => false,
    }
}
