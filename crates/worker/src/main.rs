use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aims_core::scoring::ScoringPolicy;
use aims_core::storage::metrics::RunSummary;

mod pass;

#[derive(Debug, Parser)]
#[command(name = "aims_worker")]
struct Args {
    /// Compute and log a summary without writing to the database.
    #[arg(long)]
    dry_run: bool,

    /// Threshold revision (v1 or v2). Overrides AIMS_THRESHOLD_VERSION.
    #[arg(long)]
    threshold_version: Option<String>,

    /// Comparison population for deviations (sector or global). Overrides AIMS_BASELINE_SCOPE.
    #[arg(long)]
    baseline: Option<String>,

    /// Upper bound for composite scores. Overrides AIMS_SCORE_CAP.
    #[arg(long)]
    score_cap: Option<i32>,

    /// Fill missing previous-report links before recomputing.
    #[arg(long)]
    link_prev_reports: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = aims_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let policy = resolve_policy(&args)?;

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    aims_core::storage::migrate(&pool).await?;

    // The advisory lock belongs to this connection; keep it checked out for the
    // whole pass.
    let mut lock_conn = pool.acquire().await.context("acquire lock connection failed")?;
    let acquired = aims_core::storage::lock::try_acquire_recompute_lock(&mut lock_conn).await?;
    if !acquired {
        tracing::warn!("recompute lock not acquired; another run in progress");
        return Ok(());
    }

    let started_at = chrono::Utc::now();
    let opts = pass::PassOptions {
        dry_run: args.dry_run,
        link_prev_reports: args.link_prev_reports,
    };
    let result = pass::run(&pool, policy, opts, started_at).await;

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "recompute run failed");

        if !args.dry_run {
            let mut summary = RunSummary::new(&policy, started_at);
            summary.finished_at = chrono::Utc::now();
            match aims_core::storage::metrics::record_failed_run(&pool, &summary, &format!("{err:#}"))
                .await
            {
                Ok(run_id) => tracing::info!(%run_id, "failed run recorded"),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "recording failed run failed");
                }
            }
        }
    }

    let _ = aims_core::storage::lock::release_recompute_lock(&mut lock_conn).await;
    result
}

fn resolve_policy(args: &Args) -> anyhow::Result<ScoringPolicy> {
    let mut policy = ScoringPolicy::from_env()?;

    if let Some(s) = args.threshold_version.as_deref() {
        let version = s.parse().context("invalid --threshold-version")?;
        policy.thresholds = aims_core::scoring::policy::ThresholdSet::for_version(version);
    }
    if let Some(s) = args.baseline.as_deref() {
        policy.baseline = s.parse().context("invalid --baseline")?;
    }
    if let Some(cap) = args.score_cap {
        policy.score_cap = cap;
    }

    policy.validate()?;
    Ok(policy)
}

fn init_sentry(settings: &aims_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
