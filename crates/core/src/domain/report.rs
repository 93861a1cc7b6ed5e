use anyhow::bail;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type AnalystId = i64;
pub type StockId = i64;
pub type ReportId = i64;

/// Three-way call. Used both for the stated recommendation on a report and for the
/// category derived from a hidden conviction score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opinion {
    Bearish,
    Neutral,
    Bullish,
}

impl Opinion {
    pub fn as_str(self) -> &'static str {
        match self {
            Opinion::Bullish => "bullish",
            Opinion::Neutral => "neutral",
            Opinion::Bearish => "bearish",
        }
    }
}

impl fmt::Display for Opinion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opinion {
    type Err = anyhow::Error;

    // Brokerage feeds use BUY/HOLD/SELL; stored rows use the lowercase names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" | "buy" => Ok(Opinion::Bullish),
            "neutral" | "hold" => Ok(Opinion::Neutral),
            "bearish" | "sell" => Ok(Opinion::Bearish),
            other => bail!("unknown opinion: {other:?}"),
        }
    }
}

/// Five-way display label for a hidden conviction score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpinionLabel {
    StrongBearish,
    Bearish,
    Neutral,
    Bullish,
    StrongBullish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyst {
    pub id: AnalystId,
    pub name: String,
    pub firm_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub code: String,
    pub name: String,
    pub sector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub analyst_id: AnalystId,
    pub stock_id: StockId,
    pub title: Option<String>,
    pub issue_date: NaiveDate,
    pub stated_opinion: Opinion,
    pub hidden_conviction: Option<f64>,
    pub target_price: Option<i64>,
    pub prev_report_id: Option<ReportId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub stock_id: StockId,
    pub trade_date: NaiveDate,
    pub close_price: i64,
}

/// Percentage change of a report's target price against the analyst's previous
/// report on the same stock.
pub fn target_price_change_pct(current: &Report, previous: &Report) -> Option<f64> {
    let current = current.target_price?;
    let previous = previous.target_price.filter(|p| *p != 0)?;
    Some((current - previous) as f64 / previous as f64 * 100.0)
}

/// Signed two-decimal rendering, e.g. `+8.89%`, `-13.15%`, `0.00%`.
pub fn format_change_pct(change: f64) -> String {
    let magnitude = format!("{:.2}", change.abs());
    if change > 0.0 {
        format!("+{magnitude}%")
    } else if change < 0.0 {
        format!("-{magnitude}%")
    } else {
        format!("{magnitude}%")
    }
}

/// Finds, for every report that has no back-reference yet, the same analyst's
/// latest earlier report on the same stock. Returns `(report_id, prev_report_id)`
/// pairs to persist.
pub fn resolve_previous_reports(reports: &[Report]) -> Vec<(ReportId, ReportId)> {
    let mut by_pair: BTreeMap<(AnalystId, StockId), Vec<&Report>> = BTreeMap::new();
    for r in reports {
        by_pair.entry((r.analyst_id, r.stock_id)).or_default().push(r);
    }

    let mut out = Vec::new();
    for group in by_pair.values_mut() {
        group.sort_by_key(|r| (r.issue_date, r.id));
        for (idx, report) in group.iter().enumerate() {
            if report.prev_report_id.is_some() {
                continue;
            }
            // Same-day reports are not "earlier" than each other.
            let prev = group[..idx]
                .iter()
                .rev()
                .find(|p| p.issue_date < report.issue_date);
            if let Some(prev) = prev {
                out.push((report.id, prev.id));
            }
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn report(
        id: ReportId,
        analyst_id: AnalystId,
        stock_id: StockId,
        issue_date: NaiveDate,
        conviction: f64,
        target_price: Option<i64>,
    ) -> Report {
        Report {
            id,
            analyst_id,
            stock_id,
            title: None,
            issue_date,
            stated_opinion: Opinion::Bullish,
            hidden_conviction: Some(conviction),
            target_price,
            prev_report_id: None,
        }
    }
}
