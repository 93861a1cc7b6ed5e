use crate::domain::contract::{PriceRow, ReportRow, StockRow};
use crate::domain::report::{Report, Stock, StockId};
use crate::error::UnknownStockError;
use crate::scoring::prices::PriceBook;
use anyhow::Context;
use chrono::NaiveDate;

pub async fn fetch_stock(pool: &sqlx::PgPool, stock_id: StockId) -> anyhow::Result<Stock> {
    let row = sqlx::query_as::<_, StockRow>("SELECT id, code, name, sector FROM stocks WHERE id = $1")
        .bind(stock_id)
        .fetch_optional(pool)
        .await
        .context("select stock failed")?;

    let Some(row) = row else {
        return Err(UnknownStockError { stock_id }.into());
    };
    row.validate_and_into_stock()
}

/// Everything a consensus read needs for one stock.
#[derive(Debug, Clone)]
pub struct ConsensusInputs {
    pub stock: Stock,
    pub reports: Vec<Report>,
    pub prices: PriceBook,
}

/// The stock, its reports issued after `since` and its full close history.
/// Invalid rows are skipped with a warning, as in the corpus load.
pub async fn fetch_consensus_inputs(
    pool: &sqlx::PgPool,
    stock_id: StockId,
    since: NaiveDate,
) -> anyhow::Result<ConsensusInputs> {
    let stock = fetch_stock(pool, stock_id).await?;

    let report_rows = sqlx::query_as::<_, ReportRow>(
        "SELECT id, analyst_id, stock_id, title, issue_date, stated_opinion, \
                hidden_conviction, target_price, prev_report_id \
         FROM reports \
         WHERE stock_id = $1 AND issue_date > $2 \
         ORDER BY issue_date DESC, id DESC",
    )
    .bind(stock_id)
    .bind(since)
    .fetch_all(pool)
    .await
    .context("select stock reports failed")?;

    let price_rows = sqlx::query_as::<_, PriceRow>(
        "SELECT stock_id, trade_date, close_price FROM close_prices WHERE stock_id = $1 ORDER BY trade_date",
    )
    .bind(stock_id)
    .fetch_all(pool)
    .await
    .context("select stock close_prices failed")?;

    let mut reports = Vec::with_capacity(report_rows.len());
    for row in report_rows {
        let report_id = row.id;
        match row.validate_and_into_report() {
            Ok(r) => reports.push(r),
            Err(err) => tracing::warn!(report_id, error = %err, "invalid report skipped in consensus"),
        }
    }

    let mut prices = PriceBook::new();
    for row in price_rows {
        match row.validate_and_into_point() {
            Ok(p) => prices.insert(p),
            Err(err) => tracing::warn!(stock_id, error = %err, "invalid close skipped in consensus"),
        }
    }

    Ok(ConsensusInputs {
        stock,
        reports,
        prices,
    })
}
