use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aims_core::domain::metrics::AnalystMetrics;
use aims_core::domain::report::{
    format_change_pct, target_price_change_pct, Analyst, AnalystId, Opinion, OpinionLabel, ReportId,
    Stock, StockId,
};
use aims_core::error::{UnknownAnalystError, UnknownStockError};
use aims_core::ranking::{rank_profiles, restrict_to, CoveredStock, RankedAnalyst, RankingKey};
use aims_core::scoring::consensus::{stock_consensus, StockConsensus};
use aims_core::scoring::policy::ThresholdSet;
use aims_core::storage::reports::ReportListing;

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match aims_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    // Display labels only; the worker owns the thresholds used for scoring.
    let thresholds = aims_core::scoring::ScoringPolicy::from_env()?.thresholds;

    let state = AppState { pool, thresholds };

    let app = router(state).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/analysts/metrics", get(get_ranking))
        .route("/analysts/:analyst_id/metrics", get(get_analyst_metrics))
        .route("/analysts/:analyst_id/reports", get(get_analyst_reports))
        .route("/analysts/:analyst_id/stocks", get(get_covered_stocks))
        .route("/stocks/:stock_id/analysts/ranking", get(get_stock_ranking))
        .route("/stocks/:stock_id/consensus", get(get_stock_consensus))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
    thresholds: ThresholdSet,
}

#[derive(Debug, Deserialize)]
struct RankingParams {
    sort_by: Option<String>,
}

impl RankingParams {
    fn key(&self) -> Result<RankingKey, StatusCode> {
        match self.sort_by.as_deref() {
            None => Ok(RankingKey::default()),
            Some(s) => s.parse().map_err(|_| StatusCode::BAD_REQUEST),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRanking {
    sort_by: RankingKey,
    analysts: Vec<RankedAnalyst>,
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_ranking(
    State(state): State<AppState>,
    Query(params): Query<RankingParams>,
) -> Result<Json<ApiRanking>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let key = params.key()?;

    let profiles = aims_core::storage::metrics::fetch_profiles(pool)
        .await
        .map_err(internal)?;

    Ok(Json(ApiRanking {
        sort_by: key,
        analysts: rank_profiles(profiles, key),
    }))
}

async fn get_stock_ranking(
    State(state): State<AppState>,
    Path(stock_id): Path<StockId>,
    Query(params): Query<RankingParams>,
) -> Result<Json<ApiRanking>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let key = params.key()?;

    let covering = aims_core::storage::reports::fetch_covering_analysts(pool, stock_id)
        .await
        .map_err(internal)?;
    let profiles = aims_core::storage::metrics::fetch_profiles(pool)
        .await
        .map_err(internal)?;

    Ok(Json(ApiRanking {
        sort_by: key,
        analysts: rank_profiles(restrict_to(profiles, &covering), key),
    }))
}

#[derive(Debug, Serialize)]
struct ApiAnalystMetrics {
    analyst: Analyst,
    metrics: Option<AnalystMetrics>,
}

async fn get_analyst_metrics(
    State(state): State<AppState>,
    Path(analyst_id): Path<AnalystId>,
) -> Result<Json<ApiAnalystMetrics>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let (analyst, metrics) = aims_core::storage::metrics::fetch_analyst_metrics(pool, analyst_id)
        .await
        .map_err(not_found_or_internal)?;

    Ok(Json(ApiAnalystMetrics { analyst, metrics }))
}

fn not_found_or_internal(e: anyhow::Error) -> StatusCode {
    if e.downcast_ref::<UnknownAnalystError>().is_some() || e.downcast_ref::<UnknownStockError>().is_some() {
        return StatusCode::NOT_FOUND;
    }
    internal(e)
}

#[derive(Debug, Serialize)]
struct ApiCoveredStocks {
    analyst: Analyst,
    stocks: Vec<CoveredStock>,
}

async fn get_covered_stocks(
    State(state): State<AppState>,
    Path(analyst_id): Path<AnalystId>,
) -> Result<Json<ApiCoveredStocks>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let analyst = aims_core::storage::metrics::fetch_analyst(pool, analyst_id)
        .await
        .map_err(not_found_or_internal)?;
    let stocks = aims_core::storage::reports::fetch_covered_stocks(pool, analyst_id)
        .await
        .map_err(internal)?;

    Ok(Json(ApiCoveredStocks { analyst, stocks }))
}

#[derive(Debug, Serialize)]
struct ApiStockConsensus {
    stock: Stock,
    as_of: NaiveDate,
    #[serde(flatten)]
    consensus: StockConsensus,
}

async fn get_stock_consensus(
    State(state): State<AppState>,
    Path(stock_id): Path<StockId>,
) -> Result<Json<ApiStockConsensus>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of = Utc::now().date_naive();
    let since = as_of
        .checked_sub_months(Months::new(12))
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    let inputs = aims_core::storage::stocks::fetch_consensus_inputs(pool, stock_id, since)
        .await
        .map_err(not_found_or_internal)?;

    consensus_view(inputs, as_of, &state.thresholds)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// `None` when no covering analyst has a categorizable report in the window.
fn consensus_view(
    inputs: aims_core::storage::stocks::ConsensusInputs,
    as_of: NaiveDate,
    thresholds: &ThresholdSet,
) -> Option<ApiStockConsensus> {
    let consensus = stock_consensus(inputs.stock.id, &inputs.reports, as_of, &inputs.prices, thresholds)?;
    Some(ApiStockConsensus {
        stock: inputs.stock,
        as_of,
        consensus,
    })
}

#[derive(Debug, Serialize)]
struct ApiReport {
    report_id: ReportId,
    stock_id: StockId,
    stock_code: String,
    stock_name: String,
    title: Option<String>,
    issue_date: NaiveDate,
    stated_opinion: Opinion,
    hidden_opinion: Option<OpinionLabel>,
    target_price: Option<i64>,
    prev_report_id: Option<ReportId>,
    target_price_change: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiAnalystReports {
    analyst: Analyst,
    reports: Vec<ApiReport>,
}

async fn get_analyst_reports(
    State(state): State<AppState>,
    Path(analyst_id): Path<AnalystId>,
) -> Result<Json<ApiAnalystReports>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let analyst = aims_core::storage::metrics::fetch_analyst(pool, analyst_id)
        .await
        .map_err(not_found_or_internal)?;
    let listings = aims_core::storage::reports::fetch_analyst_reports(pool, analyst_id)
        .await
        .map_err(internal)?;

    let reports = listings
        .into_iter()
        .map(|l| to_api_report(l, &state.thresholds))
        .collect();

    Ok(Json(ApiAnalystReports { analyst, reports }))
}

fn to_api_report(listing: ReportListing, thresholds: &ThresholdSet) -> ApiReport {
    let ReportListing {
        report,
        stock_code,
        stock_name,
        previous,
    } = listing;

    let target_price_change = previous
        .as_ref()
        .and_then(|prev| target_price_change_pct(&report, prev))
        .map(format_change_pct);

    ApiReport {
        report_id: report.id,
        stock_id: report.stock_id,
        stock_code,
        stock_name,
        hidden_opinion: report.hidden_conviction.and_then(|c| thresholds.classify5(c)),
        title: report.title,
        issue_date: report.issue_date,
        stated_opinion: report.stated_opinion,
        target_price: report.target_price,
        prev_report_id: report.prev_report_id,
        target_price_change,
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
