use crate::domain::contract::{AnalystRow, PriceRow, ReportRow, StockRow};
use crate::scoring::engine::Corpus;
use anyhow::Context;

/// Rows dropped by domain validation while loading, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectedRows {
    pub analysts: usize,
    pub stocks: usize,
    pub reports: usize,
    pub prices: usize,
}

impl RejectedRows {
    pub fn total(&self) -> usize {
        self.analysts + self.stocks + self.reports + self.prices
    }
}

/// Loads analysts, stocks, reports and close prices from one repeatable-read
/// snapshot, so a concurrent ingest cannot hand the pass half an update.
pub async fn load_corpus(pool: &sqlx::PgPool) -> anyhow::Result<(Corpus, RejectedRows)> {
    let t0 = std::time::Instant::now();
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await
        .context("set snapshot isolation failed")?;

    let analyst_rows = sqlx::query_as::<_, AnalystRow>(
        "SELECT id, name, firm_name FROM analysts ORDER BY id",
    )
    .fetch_all(&mut *tx)
    .await
    .context("select analysts failed")?;

    let stock_rows = sqlx::query_as::<_, StockRow>(
        "SELECT id, code, name, sector FROM stocks ORDER BY id",
    )
    .fetch_all(&mut *tx)
    .await
    .context("select stocks failed")?;

    let report_rows = sqlx::query_as::<_, ReportRow>(
        "SELECT id, analyst_id, stock_id, title, issue_date, stated_opinion, \
                hidden_conviction, target_price, prev_report_id \
         FROM reports \
         ORDER BY analyst_id, stock_id, issue_date, id",
    )
    .fetch_all(&mut *tx)
    .await
    .context("select reports failed")?;

    let price_rows = sqlx::query_as::<_, PriceRow>(
        "SELECT stock_id, trade_date, close_price FROM close_prices ORDER BY stock_id, trade_date",
    )
    .fetch_all(&mut *tx)
    .await
    .context("select close_prices failed")?;

    tx.commit().await.context("commit transaction failed")?;

    let mut rejected = RejectedRows::default();

    let (analysts, n) = keep_valid(analyst_rows, "analysts", AnalystRow::validate_and_into_analyst);
    rejected.analysts = n;
    let (stocks, n) = keep_valid(stock_rows, "stocks", StockRow::validate_and_into_stock);
    rejected.stocks = n;
    let (reports, n) = keep_valid(report_rows, "reports", ReportRow::validate_and_into_report);
    rejected.reports = n;
    let (prices, n) = keep_valid(price_rows, "close_prices", PriceRow::validate_and_into_point);
    rejected.prices = n;

    let mut corpus = Corpus {
        analysts,
        stocks: stocks.into_iter().map(|s| (s.id, s)).collect(),
        reports,
        prices: prices.into_iter().collect(),
    };
    rejected.reports += corpus.retain_known_stocks();

    tracing::info!(
        analysts = corpus.analysts.len(),
        stocks = corpus.stocks.len(),
        reports = corpus.reports.len(),
        prices = corpus.prices.len(),
        rejected = rejected.total(),
        elapsed_ms = t0.elapsed().as_millis(),
        "corpus loaded"
    );

    Ok((corpus, rejected))
}

fn keep_valid<R, T>(
    rows: Vec<R>,
    table: &'static str,
    convert: impl Fn(R) -> anyhow::Result<T>,
) -> (Vec<T>, usize) {
    let mut out = Vec::with_capacity(rows.len());
    let mut rejected = 0;
    for row in rows {
        match convert(row) {
            Ok(v) => out.push(v),
            Err(err) => {
                rejected += 1;
                tracing::warn!(table, error = %err, "invalid row skipped");
            }
        }
    }
    (out, rejected)
}
