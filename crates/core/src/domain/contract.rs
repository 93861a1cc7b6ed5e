use crate::domain::report::{
    Analyst, AnalystId, PricePoint, Report, ReportId, Stock, StockId,
};
use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Report as stored by ingestion, before domain validation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportRow {
    pub id: ReportId,
    pub analyst_id: AnalystId,
    pub stock_id: StockId,
    pub title: Option<String>,
    pub issue_date: NaiveDate,
    pub stated_opinion: String,
    pub hidden_conviction: Option<f64>,
    pub target_price: Option<i64>,
    pub prev_report_id: Option<ReportId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceRow {
    pub stock_id: StockId,
    pub trade_date: NaiveDate,
    pub close_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnalystRow {
    pub id: AnalystId,
    pub name: String,
    pub firm_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockRow {
    pub id: StockId,
    pub code: String,
    pub name: String,
    pub sector: Option<String>,
}

impl ReportRow {
    pub fn validate_and_into_report(self) -> anyhow::Result<Report> {
        let stated_opinion = self.stated_opinion.parse()?;

        if let Some(conviction) = self.hidden_conviction {
            ensure!(
                conviction.is_finite() && (0.0..=1.0).contains(&conviction),
                "hidden conviction must be between 0 and 1 (report_id={}, got {conviction})",
                self.id
            );
        }

        // Zero targets are kept: they are unevaluable, not invalid.
        if let Some(target) = self.target_price {
            ensure!(
                target >= 0,
                "target price must not be negative (report_id={}, got {target})",
                self.id
            );
        }

        let title = self
            .title
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Report {
            id: self.id,
            analyst_id: self.analyst_id,
            stock_id: self.stock_id,
            title,
            issue_date: self.issue_date,
            stated_opinion,
            hidden_conviction: self.hidden_conviction,
            target_price: self.target_price,
            prev_report_id: self.prev_report_id,
        })
    }
}

impl PriceRow {
    pub fn validate_and_into_point(self) -> anyhow::Result<PricePoint> {
        ensure!(
            self.close_price > 0,
            "close price must be positive (stock_id={}, trade_date={}, got {})",
            self.stock_id,
            self.trade_date,
            self.close_price
        );
        Ok(PricePoint {
            stock_id: self.stock_id,
            trade_date: self.trade_date,
            close_price: self.close_price,
        })
    }
}

impl AnalystRow {
    pub fn validate_and_into_analyst(self) -> anyhow::Result<Analyst> {
        let name = self.name.trim().to_string();
        ensure!(!name.is_empty(), "analyst name must be non-empty (id={})", self.id);

        let firm_name = self
            .firm_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Analyst {
            id: self.id,
            name,
            firm_name,
        })
    }
}

impl StockRow {
    pub fn validate_and_into_stock(self) -> anyhow::Result<Stock> {
        let code = self.code.trim().to_string();
        ensure!(!code.is_empty(), "stock code must be non-empty (id={})", self.id);

        let sector = self
            .sector
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Stock {
            id: self.id,
            code,
            name: self.name.trim().to_string(),
            sector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::Opinion;

    fn row() -> ReportRow {
        ReportRow {
            id: 11,
            analyst_id: 1,
            stock_id: 2,
            title: Some("  ".to_string()),
            issue_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            stated_opinion: "BUY".to_string(),
            hidden_conviction: Some(0.82),
            target_price: Some(91_000),
            prev_report_id: None,
        }
    }

    #[test]
    fn accepts_valid_report_row() {
        let report = row().validate_and_into_report().unwrap();
        assert_eq!(report.stated_opinion, Opinion::Bullish);
        assert_eq!(report.title, None);
        assert_eq!(report.target_price, Some(91_000));
    }

    #[test]
    fn keeps_zero_and_missing_targets() {
        let mut r = row();
        r.target_price = Some(0);
        assert!(r.validate_and_into_report().is_ok());

        let mut r = row();
        r.target_price = None;
        r.hidden_conviction = None;
        assert!(r.validate_and_into_report().is_ok());
    }

    #[test]
    fn rejects_out_of_range_conviction() {
        let mut r = row();
        r.hidden_conviction = Some(1.2);
        assert!(r.validate_and_into_report().is_err());

        let mut r = row();
        r.hidden_conviction = Some(f64::NAN);
        assert!(r.validate_and_into_report().is_err());
    }

    #[test]
    fn rejects_unknown_opinion_and_negative_target() {
        let mut r = row();
        r.stated_opinion = "overweight".to_string();
        assert!(r.validate_and_into_report().is_err());

        let mut r = row();
        r.target_price = Some(-5);
        assert!(r.validate_and_into_report().is_err());
    }

    #[test]
    fn rejects_non_positive_close() {
        let p = PriceRow {
            stock_id: 2,
            trade_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            close_price: 0,
        };
        assert!(p.validate_and_into_point().is_err());
    }

    #[test]
    fn blank_sector_is_unclassified() {
        let s = StockRow {
            id: 2,
            code: " 005930 ".to_string(),
            name: "삼성전자".to_string(),
            sector: Some(" ".to_string()),
        }
        .validate_and_into_stock()
        .unwrap();
        assert_eq!(s.code, "005930");
        assert_eq!(s.sector, None);
    }
}
