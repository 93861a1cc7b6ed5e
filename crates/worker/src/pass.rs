use anyhow::Context;
use chrono::{DateTime, Utc};

use aims_core::domain::report::resolve_previous_reports;
use aims_core::scoring::policy::BaselineScope;
use aims_core::scoring::{recompute, RecomputeOutcome, ScoringPolicy};
use aims_core::storage::metrics::RunSummary;

const DRY_RUN_PREVIEW: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct PassOptions {
    pub dry_run: bool,
    pub link_prev_reports: bool,
}

/// One full recomputation: snapshot load, optional link backfill, scoring on a
/// blocking thread, then publish (or log, on a dry run).
pub async fn run(
    pool: &sqlx::PgPool,
    policy: ScoringPolicy,
    opts: PassOptions,
    started_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let (corpus, rejected) = aims_core::storage::corpus::load_corpus(pool).await?;
    if rejected.total() > 0 {
        tracing::warn!(
            analysts = rejected.analysts,
            stocks = rejected.stocks,
            reports = rejected.reports,
            prices = rejected.prices,
            "rows rejected by validation"
        );
    }

    if opts.link_prev_reports {
        let links = resolve_previous_reports(&corpus.reports);
        if opts.dry_run {
            tracing::info!(links = links.len(), dry_run = true, "previous-report links resolved");
        } else {
            let updated =
                aims_core::storage::reports::persist_previous_report_links(pool, &links).await?;
            tracing::info!(links = links.len(), updated, "previous-report links persisted");
        }
    }

    // recompute is deterministic for a fixed computed_at; updated_at records this pass's start.
    let computed_at = started_at;
    let outcome = tokio::task::spawn_blocking(move || recompute(&corpus, &policy, computed_at))
        .await
        .context("recompute task failed")?;

    let mut summary = RunSummary::new(&policy, started_at);
    summary.analysts_scored = count(outcome.metrics.len())?;
    summary.analysts_skipped = count(outcome.skipped.len())?;
    summary.analysts_failed = count(outcome.failed.len())?;
    summary.finished_at = Utc::now();

    if opts.dry_run {
        log_preview(&outcome);
        tracing::info!(
            dry_run = true,
            scored = summary.analysts_scored,
            skipped = summary.analysts_skipped,
            failed = summary.analysts_failed,
            threshold_version = %summary.threshold_version,
            baseline = %summary.baseline_scope,
            "recompute finished (dry-run)"
        );
        return Ok(());
    }

    let run_id = aims_core::storage::metrics::publish_run(pool, &outcome.metrics, &summary).await?;
    tracing::info!(
        %run_id,
        scored = summary.analysts_scored,
        skipped = summary.analysts_skipped,
        failed = summary.analysts_failed,
        "recompute published"
    );
    Ok(())
}

fn count(n: usize) -> anyhow::Result<i32> {
    i32::try_from(n).with_context(|| format!("count out of range: {n}"))
}

fn population_label(scope: BaselineScope, key: Option<&str>) -> &str {
    match (scope, key) {
        (BaselineScope::Global, _) => "global",
        (BaselineScope::Sector, Some(sector)) => sector,
        (BaselineScope::Sector, None) => "unclassified",
    }
}

fn log_preview(outcome: &RecomputeOutcome) {
    for (scope, baseline) in outcome.baselines.iter() {
        tracing::info!(
            population = population_label(outcome.baselines.scope(), scope),
            reports = baseline.report_count,
            average_return = ?baseline.average_return,
            average_target_error = ?baseline.average_target_error,
            "baseline"
        );
    }

    let mut top: Vec<_> = outcome.metrics.iter().collect();
    top.sort_by(|a, b| b.composite_score.cmp(&a.composite_score).then(a.analyst_id.cmp(&b.analyst_id)));
    for m in top.into_iter().take(DRY_RUN_PREVIEW) {
        let m = m.rounded();
        tracing::info!(
            analyst_id = m.analyst_id,
            composite_score = ?m.composite_score,
            accuracy_rate = m.accuracy_rate,
            average_return = m.average_return,
            report_count = m.report_count,
            "scored analyst"
        );
    }

    for f in &outcome.failed {
        tracing::warn!(analyst_id = f.analyst_id, error = %f.error, "analyst failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_names_populations_by_scope() {
        assert_eq!(population_label(BaselineScope::Global, None), "global");
        assert_eq!(population_label(BaselineScope::Sector, Some("Semiconductors")), "Semiconductors");
        assert_eq!(population_label(BaselineScope::Sector, None), "unclassified");
    }
}
