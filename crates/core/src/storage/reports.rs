use crate::domain::contract::{ReportRow, StockRow};
use crate::domain::report::{AnalystId, Report, ReportId, StockId};
use crate::ranking::{rank_covered_stocks, CoveredStock};
use anyhow::Context;
use std::collections::BTreeSet;

const UPDATE_BATCH: usize = 500;

/// Writes back-references found by `resolve_previous_reports`. Reports that
/// already carry one are left alone.
pub async fn persist_previous_report_links(
    pool: &sqlx::PgPool,
    links: &[(ReportId, ReportId)],
) -> anyhow::Result<u64> {
    if links.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut updated: u64 = 0;

    for chunk in links.chunks(UPDATE_BATCH) {
        let mut qb = sqlx::QueryBuilder::new("UPDATE reports AS r SET prev_report_id = v.prev_id FROM (");
        qb.push_values(chunk, |mut b, (id, prev_id)| {
            b.push_bind(*id).push_bind(*prev_id);
        });
        qb.push(") AS v(id, prev_id) WHERE r.id = v.id AND r.prev_report_id IS NULL");

        updated += qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch update reports.prev_report_id failed")?
            .rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(updated)
}

/// Analysts who have published at least one report on `stock_id`.
pub async fn fetch_covering_analysts(
    pool: &sqlx::PgPool,
    stock_id: StockId,
) -> anyhow::Result<BTreeSet<AnalystId>> {
    let ids: Vec<AnalystId> =
        sqlx::query_scalar("SELECT DISTINCT analyst_id FROM reports WHERE stock_id = $1")
            .bind(stock_id)
            .fetch_all(pool)
            .await
            .context("select covering analysts failed")?;
    Ok(ids.into_iter().collect())
}

#[derive(Debug, sqlx::FromRow)]
struct CoveredStockRow {
    #[sqlx(flatten)]
    stock: StockRow,
    report_count: i64,
}

/// Stocks the analyst has published on, most-covered first.
pub async fn fetch_covered_stocks(
    pool: &sqlx::PgPool,
    analyst_id: AnalystId,
) -> anyhow::Result<Vec<CoveredStock>> {
    let rows = sqlx::query_as::<_, CoveredStockRow>(
        "SELECT s.id, s.code, s.name, s.sector, COUNT(*) AS report_count \
         FROM reports r \
         JOIN stocks s ON s.id = r.stock_id \
         WHERE r.analyst_id = $1 \
         GROUP BY s.id, s.code, s.name, s.sector",
    )
    .bind(analyst_id)
    .fetch_all(pool)
    .await
    .context("select covered stocks failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let stock_id = row.stock.id;
        match row.stock.validate_and_into_stock() {
            Ok(stock) => out.push(CoveredStock {
                stock,
                report_count: row.report_count,
            }),
            Err(err) => {
                tracing::warn!(stock_id, error = %err, "invalid stock skipped in coverage");
            }
        }
    }
    Ok(rank_covered_stocks(out))
}

/// One row of an analyst's report history.
#[derive(Debug, Clone)]
pub struct ReportListing {
    pub report: Report,
    pub stock_code: String,
    pub stock_name: String,
    pub previous: Option<Report>,
}

#[derive(Debug, sqlx::FromRow)]
struct ListingRow {
    #[sqlx(flatten)]
    report: ReportRow,
    stock_code: String,
    stock_name: String,
    prev_issue_date: Option<chrono::NaiveDate>,
    prev_stated_opinion: Option<String>,
    prev_hidden_conviction: Option<f64>,
    prev_target_price: Option<i64>,
}

/// The analyst's reports, newest first. Rows that fail validation are skipped.
pub async fn fetch_analyst_reports(
    pool: &sqlx::PgPool,
    analyst_id: AnalystId,
) -> anyhow::Result<Vec<ReportListing>> {
    let rows = sqlx::query_as::<_, ListingRow>(
        "SELECT r.id, r.analyst_id, r.stock_id, r.title, r.issue_date, r.stated_opinion, \
                r.hidden_conviction, r.target_price, r.prev_report_id, \
                s.code AS stock_code, s.name AS stock_name, \
                p.issue_date AS prev_issue_date, p.stated_opinion AS prev_stated_opinion, \
                p.hidden_conviction AS prev_hidden_conviction, p.target_price AS prev_target_price \
         FROM reports r \
         JOIN stocks s ON s.id = r.stock_id \
         LEFT JOIN reports p ON p.id = r.prev_report_id \
         WHERE r.analyst_id = $1 \
         ORDER BY r.issue_date DESC, r.id DESC",
    )
    .bind(analyst_id)
    .fetch_all(pool)
    .await
    .context("select analyst reports failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let previous = match (row.report.prev_report_id, row.prev_issue_date, row.prev_stated_opinion) {
            (Some(prev_id), Some(issue_date), Some(stated_opinion)) => ReportRow {
                id: prev_id,
                analyst_id: row.report.analyst_id,
                stock_id: row.report.stock_id,
                title: None,
                issue_date,
                stated_opinion,
                hidden_conviction: row.prev_hidden_conviction,
                target_price: row.prev_target_price,
                prev_report_id: None,
            }
            .validate_and_into_report()
            .ok(),
            _ => None,
        };

        let report_id = row.report.id;
        match row.report.validate_and_into_report() {
            Ok(report) => out.push(ReportListing {
                report,
                stock_code: row.stock_code,
                stock_name: row.stock_name,
                previous,
            }),
            Err(err) => {
                tracing::warn!(report_id, error = %err, "invalid report skipped in listing");
            }
        }
    }
    Ok(out)
}
