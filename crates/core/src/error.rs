use crate::domain::report::{AnalystId, StockId};
use std::fmt;

/// Direct lookup of an analyst id that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownAnalystError {
    pub analyst_id: AnalystId,
}

impl fmt::Display for UnknownAnalystError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown analyst (analyst_id={})", self.analyst_id)
    }
}

impl std::error::Error for UnknownAnalystError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownStockError {
    pub stock_id: StockId,
}

impl fmt::Display for UnknownStockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stock (stock_id={})", self.stock_id)
    }
}

impl std::error::Error for UnknownStockError {}
