use crate::domain::metrics::{AnalystMetrics, AnalystProfile};
use crate::domain::report::{Analyst, AnalystId};
use crate::error::UnknownAnalystError;
use crate::scoring::policy::ScoringPolicy;
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

const INSERT_BATCH: usize = 500;

/// Bookkeeping for one worker pass, written to `metrics_runs`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub threshold_version: String,
    pub baseline_scope: String,
    pub analysts_scored: i32,
    pub analysts_skipped: i32,
    pub analysts_failed: i32,
}

impl RunSummary {
    pub fn new(policy: &ScoringPolicy, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            threshold_version: policy.thresholds.version.as_str().to_string(),
            baseline_scope: policy.baseline.as_str().to_string(),
            analysts_scored: 0,
            analysts_skipped: 0,
            analysts_failed: 0,
        }
    }
}

/// Replaces the published metrics with `metrics` and records the run, all in one
/// transaction. Readers see either the previous set or the new one.
pub async fn publish_run(
    pool: &sqlx::PgPool,
    metrics: &[AnalystMetrics],
    summary: &RunSummary,
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    insert_run(&mut tx, run_id, summary, "success", None).await?;

    let deleted = sqlx::query("DELETE FROM analyst_metrics")
        .execute(&mut *tx)
        .await
        .context("delete analyst_metrics failed")?
        .rows_affected();

    let mut inserted: u64 = 0;
    for chunk in metrics.chunks(INSERT_BATCH) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO analyst_metrics (analyst_id, accuracy_rate, average_return, average_target_error, \
             return_deviation, target_error_deviation, report_count, composite_score, updated_at, run_id) ",
        );
        qb.push_values(chunk, |mut b, m| {
            let m = m.rounded();
            b.push_bind(m.analyst_id)
                .push_bind(m.accuracy_rate)
                .push_bind(m.average_return)
                .push_bind(m.average_target_error)
                .push_bind(m.return_deviation)
                .push_bind(m.target_error_deviation)
                .push_bind(m.report_count)
                .push_bind(m.composite_score)
                .push_bind(m.updated_at)
                .push_bind(run_id);
        });

        inserted += qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch insert analyst_metrics failed")?
            .rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;

    tracing::info!(%run_id, deleted, inserted, "analyst metrics published");
    Ok(run_id)
}

/// Records a failed pass. Published metrics are left untouched.
pub async fn record_failed_run(
    pool: &sqlx::PgPool,
    summary: &RunSummary,
    error: &str,
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await.context("begin transaction failed")?;
    insert_run(&mut tx, run_id, summary, "error", Some(error)).await?;
    tx.commit().await.context("commit transaction failed")?;
    Ok(run_id)
}

async fn insert_run(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: Uuid,
    summary: &RunSummary,
    status: &str,
    error: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO metrics_runs (id, started_at, finished_at, status, threshold_version, baseline_scope, \
         analysts_scored, analysts_skipped, analysts_failed, error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(summary.started_at)
    .bind(summary.finished_at)
    .bind(status)
    .bind(&summary.threshold_version)
    .bind(&summary.baseline_scope)
    .bind(summary.analysts_scored)
    .bind(summary.analysts_skipped)
    .bind(summary.analysts_failed)
    .bind(error)
    .execute(&mut **tx)
    .await
    .context("insert metrics_runs failed")?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: AnalystId,
    name: String,
    firm_name: Option<String>,
    accuracy_rate: f64,
    average_return: f64,
    average_target_error: Option<f64>,
    return_deviation: Option<f64>,
    target_error_deviation: Option<f64>,
    report_count: i32,
    composite_score: Option<i32>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for AnalystProfile {
    fn from(r: ProfileRow) -> Self {
        AnalystProfile {
            analyst: Analyst {
                id: r.id,
                name: r.name,
                firm_name: r.firm_name,
            },
            metrics: AnalystMetrics {
                analyst_id: r.id,
                accuracy_rate: r.accuracy_rate,
                average_return: r.average_return,
                average_target_error: r.average_target_error,
                return_deviation: r.return_deviation,
                target_error_deviation: r.target_error_deviation,
                report_count: r.report_count,
                composite_score: r.composite_score,
                updated_at: r.updated_at,
            },
        }
    }
}

const PROFILE_COLUMNS: &str = "a.id, a.name, a.firm_name, m.accuracy_rate, m.average_return, \
     m.average_target_error, m.return_deviation, m.target_error_deviation, m.report_count, \
     m.composite_score, m.updated_at";

/// Every analyst with published metrics, in id order.
pub async fn fetch_profiles(pool: &sqlx::PgPool) -> anyhow::Result<Vec<AnalystProfile>> {
    let sql = format!(
        "SELECT {PROFILE_COLUMNS} \
         FROM analyst_metrics m JOIN analysts a ON a.id = m.analyst_id \
         ORDER BY a.id"
    );
    let rows = sqlx::query_as::<_, ProfileRow>(&sql)
        .fetch_all(pool)
        .await
        .context("select analyst profiles failed")?;
    Ok(rows.into_iter().map(AnalystProfile::from).collect())
}

pub async fn fetch_analyst(pool: &sqlx::PgPool, analyst_id: AnalystId) -> anyhow::Result<Analyst> {
    let row = sqlx::query_as::<_, (AnalystId, String, Option<String>)>(
        "SELECT id, name, firm_name FROM analysts WHERE id = $1",
    )
    .bind(analyst_id)
    .fetch_optional(pool)
    .await
    .context("select analyst failed")?;

    let Some((id, name, firm_name)) = row else {
        return Err(UnknownAnalystError { analyst_id }.into());
    };
    Ok(Analyst { id, name, firm_name })
}

/// Published metrics for one analyst. `Ok((analyst, None))` when the analyst exists
/// but had nothing evaluable in the last pass; [`UnknownAnalystError`] when the id
/// does not exist.
pub async fn fetch_analyst_metrics(
    pool: &sqlx::PgPool,
    analyst_id: AnalystId,
) -> anyhow::Result<(Analyst, Option<AnalystMetrics>)> {
    let analyst = fetch_analyst(pool, analyst_id).await?;

    let sql = format!(
        "SELECT {PROFILE_COLUMNS} \
         FROM analyst_metrics m JOIN analysts a ON a.id = m.analyst_id \
         WHERE a.id = $1"
    );
    let row = sqlx::query_as::<_, ProfileRow>(&sql)
        .bind(analyst_id)
        .fetch_optional(pool)
        .await
        .context("select analyst metrics failed")?;

    Ok((analyst, row.map(|r| AnalystProfile::from(r).metrics)))
}
