use crate::domain::metrics::{AnalystMetrics, EvaluationResult};
use crate::domain::report::{Analyst, AnalystId, Report, Stock, StockId};
use crate::scoring::aggregator::{aggregate_analyst, evaluate_corpus, Baselines};
use crate::scoring::percentile::assign_composite_scores;
use crate::scoring::policy::ScoringPolicy;
use crate::scoring::prices::PriceBook;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Everything one recomputation reads, loaded from a single consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub analysts: Vec<Analyst>,
    pub stocks: BTreeMap<StockId, Stock>,
    pub reports: Vec<Report>,
    pub prices: PriceBook,
}

impl Corpus {
    /// Drops reports whose stock is not in `stocks` (missing or rejected at load).
    pub fn retain_known_stocks(&mut self) -> usize {
        let before = self.reports.len();
        let stocks = &self.stocks;
        self.reports.retain(|r| {
            let known = stocks.contains_key(&r.stock_id);
            if !known {
                tracing::warn!(report_id = r.id, stock_id = r.stock_id, "report skipped: unknown stock");
            }
            known
        });
        before - self.reports.len()
    }
}

#[derive(Debug, Clone)]
pub struct AnalystFailure {
    pub analyst_id: AnalystId,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct RecomputeOutcome {
    /// One row per analyst with at least one evaluable report, ordered by id.
    pub metrics: Vec<AnalystMetrics>,
    /// Analysts with no evaluable report this pass.
    pub skipped: Vec<AnalystId>,
    pub failed: Vec<AnalystFailure>,
    pub baselines: Baselines,
    pub evaluated_reports: usize,
}

/// Recomputes metrics for every analyst in the corpus.
///
/// Pure over its inputs: the same corpus, policy and `computed_at` always produce
/// the same outcome. A failure while aggregating one analyst is logged and
/// recorded; the rest of the pass continues.
pub fn recompute(corpus: &Corpus, policy: &ScoringPolicy, computed_at: DateTime<Utc>) -> RecomputeOutcome {
    let evaluations = evaluate_corpus(&corpus.reports, &corpus.stocks, &corpus.prices, policy);
    score_evaluations(&corpus.analysts, evaluations, policy, computed_at)
}

/// Baselines, per-analyst aggregation and composite scoring over evaluations
/// that have already been produced.
pub(crate) fn score_evaluations(
    analysts: &[Analyst],
    evaluations: BTreeMap<AnalystId, Vec<EvaluationResult>>,
    policy: &ScoringPolicy,
    computed_at: DateTime<Utc>,
) -> RecomputeOutcome {
    let evaluated_reports: usize = evaluations.values().map(Vec::len).sum();

    let baselines = Baselines::compute(evaluations.values().flatten(), policy.baseline);
    tracing::debug!(
        scope = policy.baseline.as_str(),
        populations = baselines.len(),
        evaluated_reports,
        "baselines computed"
    );

    let mut analyst_ids: Vec<AnalystId> = analysts.iter().map(|a| a.id).collect();
    analyst_ids.extend(evaluations.keys().copied());
    analyst_ids.sort_unstable();
    analyst_ids.dedup();

    let mut metrics = Vec::new();
    let mut skipped = Vec::new();
    let mut failed = Vec::new();

    for analyst_id in analyst_ids {
        let evals = evaluations.get(&analyst_id).map(Vec::as_slice).unwrap_or_default();
        match aggregate_analyst(evals, &baselines) {
            Ok(Some(raw)) => {
                let report_count = match i32::try_from(raw.report_count) {
                    Ok(n) => n,
                    Err(_) => {
                        failed.push(AnalystFailure {
                            analyst_id,
                            error: format!("report count overflow: {}", raw.report_count),
                        });
                        continue;
                    }
                };
                metrics.push(AnalystMetrics {
                    analyst_id,
                    accuracy_rate: raw.accuracy_rate,
                    average_return: raw.average_return,
                    average_target_error: raw.average_target_error,
                    return_deviation: raw.return_deviation,
                    target_error_deviation: raw.target_error_deviation,
                    report_count,
                    composite_score: None,
                    updated_at: computed_at,
                });
            }
            Ok(None) => skipped.push(analyst_id),
            Err(err) => {
                tracing::warn!(analyst_id, error = %err, "analyst aggregation failed; skipping");
                failed.push(AnalystFailure {
                    analyst_id,
                    error: format!("{err:#}"),
                });
            }
        }
    }

    assign_composite_scores(&mut metrics, policy);

    tracing::info!(
        analysts = metrics.len(),
        skipped = skipped.len(),
        failed = failed.len(),
        evaluated_reports,
        threshold_version = %policy.thresholds.version,
        "recompute finished"
    );

    RecomputeOutcome {
        metrics,
        skipped,
        failed,
        baselines,
        evaluated_reports,
    }
}
