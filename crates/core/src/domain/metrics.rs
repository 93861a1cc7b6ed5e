use crate::domain::report::{Analyst, AnalystId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-report verdict. Lives only for the duration of a batch pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub correct: bool,
    pub return_pct: f64,
    /// Absent when the report is excluded from target-error scoring.
    pub target_error_pct: Option<f64>,
    pub sector: Option<String>,
}

/// Published performance record for one analyst. Overwritten wholesale on every
/// recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystMetrics {
    pub analyst_id: AnalystId,
    pub accuracy_rate: f64,
    pub average_return: f64,
    pub average_target_error: Option<f64>,
    pub return_deviation: Option<f64>,
    pub target_error_deviation: Option<f64>,
    pub report_count: i32,
    pub composite_score: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalystProfile {
    pub analyst: Analyst,
    pub metrics: AnalystMetrics,
}

/// Rounds to two decimals, matching how published values are displayed.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl AnalystMetrics {
    pub fn rounded(&self) -> Self {
        Self {
            accuracy_rate: round2(self.accuracy_rate),
            average_return: round2(self.average_return),
            average_target_error: self.average_target_error.map(round2),
            return_deviation: self.return_deviation.map(round2),
            target_error_deviation: self.target_error_deviation.map(round2),
            ..self.clone()
        }
    }
}
