use crate::domain::metrics::EvaluationResult;
use crate::domain::report::{AnalystId, Report, Stock, StockId};
use crate::scoring::evaluator::evaluate;
use crate::scoring::opinion_change::find_opinion_change;
use crate::scoring::policy::{BaselineScope, ScoringPolicy};
use crate::scoring::prices::PriceSeries;
use crate::time::window::one_year_after;
use anyhow::ensure;
use std::collections::BTreeMap;

/// Prices a report's evaluation window and runs the evaluator on it.
///
/// `later` holds the same analyst's reports on the same stock, oldest first. The
/// window closes at the first opinion change, or one year after issue when the
/// analyst never changed category.
pub fn evaluate_in_window<P: PriceSeries>(
    report: &Report,
    later: &[Report],
    sector: Option<&str>,
    prices: &P,
    policy: &ScoringPolicy,
) -> Option<EvaluationResult> {
    let issue_price = prices.close_on_or_before(report.stock_id, report.issue_date)?;
    let horizon = one_year_after(report.issue_date)?;

    let comparison_date = find_opinion_change(report, later, horizon, &policy.thresholds)
        .map(|change| change.issue_date)
        .unwrap_or(horizon);
    let comparison_price = prices.close_on_or_after(report.stock_id, comparison_date)?;

    evaluate(report, issue_price, comparison_price, sector, policy)
}

/// Evaluates every report in the corpus once. Results are keyed by analyst and
/// ordered by (stock, issue date, report id) so downstream sums are reproducible.
pub fn evaluate_corpus<P: PriceSeries>(
    reports: &[Report],
    stocks: &BTreeMap<StockId, Stock>,
    prices: &P,
    policy: &ScoringPolicy,
) -> BTreeMap<AnalystId, Vec<EvaluationResult>> {
    let mut by_pair: BTreeMap<(AnalystId, StockId), Vec<&Report>> = BTreeMap::new();
    for r in reports {
        by_pair.entry((r.analyst_id, r.stock_id)).or_default().push(r);
    }

    let mut out: BTreeMap<AnalystId, Vec<EvaluationResult>> = BTreeMap::new();
    for ((analyst_id, stock_id), mut group) in by_pair {
        group.sort_by_key(|r| (r.issue_date, r.id));
        let stream: Vec<Report> = group.into_iter().cloned().collect();
        let sector = stocks.get(&stock_id).and_then(|s| s.sector.as_deref());

        let evaluated = stream.iter().enumerate().filter_map(|(idx, report)| {
            evaluate_in_window(report, &stream[idx + 1..], sector, prices, policy)
        });
        out.entry(analyst_id).or_default().extend(evaluated);
    }

    out
}

/// Mean return and mean target error of one comparison population.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Baseline {
    pub average_return: Option<f64>,
    pub average_target_error: Option<f64>,
    pub report_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Baselines {
    scope: BaselineScope,
    // Sector scope keys by sector label (None = unclassified); global scope uses a
    // single None key.
    populations: BTreeMap<Option<String>, Baseline>,
}

impl Baselines {
    pub fn compute<'a, I>(evaluations: I, scope: BaselineScope) -> Self
    where
        I: IntoIterator<Item = &'a EvaluationResult>,
    {
        #[derive(Default)]
        struct Acc {
            return_sum: f64,
            return_n: usize,
            target_sum: f64,
            target_n: usize,
        }

        let mut acc: BTreeMap<Option<String>, Acc> = BTreeMap::new();
        for e in evaluations {
            let a = acc.entry(population_key(scope, e)).or_default();
            a.return_sum += e.return_pct;
            a.return_n += 1;
            if let Some(te) = e.target_error_pct {
                a.target_sum += te;
                a.target_n += 1;
            }
        }

        let populations = acc
            .into_iter()
            .map(|(key, a)| {
                let baseline = Baseline {
                    average_return: (a.return_n > 0).then(|| a.return_sum / a.return_n as f64),
                    average_target_error: (a.target_n > 0)
                        .then(|| a.target_sum / a.target_n as f64),
                    report_count: a.return_n,
                };
                (key, baseline)
            })
            .collect();

        Self { scope, populations }
    }

    pub fn scope(&self) -> BaselineScope {
        self.scope
    }

    pub fn for_evaluation(&self, e: &EvaluationResult) -> Option<&Baseline> {
        self.populations.get(&population_key(self.scope, e))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &Baseline)> {
        self.populations.iter().map(|(k, v)| (k.as_deref(), v))
    }

    pub fn len(&self) -> usize {
        self.populations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.populations.is_empty()
    }
}

fn population_key(scope: BaselineScope, e: &EvaluationResult) -> Option<String> {
    match scope {
        BaselineScope::Sector => e.sector.clone(),
        BaselineScope::Global => None,
    }
}

/// Unscored aggregate for one analyst.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMetrics {
    pub accuracy_rate: f64,
    pub average_return: f64,
    pub average_target_error: Option<f64>,
    pub return_deviation: Option<f64>,
    pub target_error_deviation: Option<f64>,
    pub report_count: usize,
}

/// Aggregates one analyst's evaluations. `Ok(None)` means nothing was evaluable
/// and the analyst gets no metrics this pass.
///
/// Deviations average the per-report differences from each report's own
/// population baseline, so an analyst concentrated in one volatile sector is
/// compared against that sector only.
pub fn aggregate_analyst(
    evaluations: &[EvaluationResult],
    baselines: &Baselines,
) -> anyhow::Result<Option<RawMetrics>> {
    if evaluations.is_empty() {
        return Ok(None);
    }

    let n = evaluations.len();
    let correct = evaluations.iter().filter(|e| e.correct).count();
    let accuracy_rate = correct as f64 / n as f64 * 100.0;

    let average_return = mean(evaluations.iter().map(|e| e.return_pct))
        .unwrap_or_default();
    let average_target_error = mean(evaluations.iter().filter_map(|e| e.target_error_pct));

    let return_deviation = mean(evaluations.iter().filter_map(|e| {
        let b = baselines.for_evaluation(e)?.average_return?;
        Some(e.return_pct - b)
    }));
    let target_error_deviation = mean(evaluations.iter().filter_map(|e| {
        let te = e.target_error_pct?;
        let b = baselines.for_evaluation(e)?.average_target_error?;
        Some(te - b)
    }));

    let metrics = RawMetrics {
        accuracy_rate,
        average_return,
        average_target_error,
        return_deviation,
        target_error_deviation,
        report_count: n,
    };

    ensure!(
        metrics.average_return.is_finite()
            && [
                metrics.average_target_error,
                metrics.return_deviation,
                metrics.target_error_deviation,
            ]
            .iter()
            .flatten()
            .all(|v| v.is_finite()),
        "non-finite aggregate: {metrics:?}"
    );

    Ok(Some(metrics))
}

pub(crate) fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
