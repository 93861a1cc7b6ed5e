use crate::domain::report::{PricePoint, StockId};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Daily close lookup. Dates without a trading session resolve to the nearest
/// session in the requested direction.
pub trait PriceSeries {
    /// Close on the first trading day on or after `date`.
    fn close_on_or_after(&self, stock_id: StockId, date: NaiveDate) -> Option<i64>;

    /// Close on the last trading day on or before `date`.
    fn close_on_or_before(&self, stock_id: StockId, date: NaiveDate) -> Option<i64>;
}

/// In-memory price history, one ordered series per stock.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    series: BTreeMap<StockId, BTreeMap<NaiveDate, i64>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later duplicates for the same (stock, date) replace earlier ones.
    pub fn insert(&mut self, point: PricePoint) {
        self.series
            .entry(point.stock_id)
            .or_default()
            .insert(point.trade_date, point.close_price);
    }

    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl FromIterator<PricePoint> for PriceBook {
    fn from_iter<I: IntoIterator<Item = PricePoint>>(iter: I) -> Self {
        let mut book = PriceBook::new();
        for p in iter {
            book.insert(p);
        }
        book
    }
}

impl PriceSeries for PriceBook {
    fn close_on_or_after(&self, stock_id: StockId, date: NaiveDate) -> Option<i64> {
        self.series
            .get(&stock_id)?
            .range(date..)
            .next()
            .map(|(_, close)| *close)
    }

    fn close_on_or_before(&self, stock_id: StockId, date: NaiveDate) -> Option<i64> {
        self.series
            .get(&stock_id)?
            .range(..=date)
            .next_back()
            .map(|(_, close)| *close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::fixtures::date;

    fn book() -> PriceBook {
        [
            (date(2024, 1, 5), 100),
            (date(2024, 1, 8), 110),
            (date(2024, 1, 9), 120),
        ]
        .into_iter()
        .map(|(trade_date, close_price)| PricePoint {
            stock_id: 1,
            trade_date,
            close_price,
        })
        .collect()
    }

    #[test]
    fn forward_lookup_skips_weekend() {
        let b = book();
        // 2024-01-06 is a Saturday.
        assert_eq!(b.close_on_or_after(1, date(2024, 1, 6)), Some(110));
        assert_eq!(b.close_on_or_after(1, date(2024, 1, 8)), Some(110));
        assert_eq!(b.close_on_or_after(1, date(2024, 1, 10)), None);
    }

    #[test]
    fn backward_lookup_uses_last_session() {
        let b = book();
        assert_eq!(b.close_on_or_before(1, date(2024, 1, 7)), Some(100));
        assert_eq!(b.close_on_or_before(1, date(2024, 1, 9)), Some(120));
        assert_eq!(b.close_on_or_before(1, date(2024, 1, 4)), None);
    }

    #[test]
    fn unknown_stock_has_no_prices() {
        let b = book();
        assert_eq!(b.close_on_or_after(2, date(2024, 1, 5)), None);
        assert_eq!(b.len(), 3);
    }
}
