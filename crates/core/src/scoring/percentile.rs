use crate::domain::metrics::AnalystMetrics;
use crate::domain::report::AnalystId;
use crate::scoring::policy::ScoringPolicy;
use std::collections::BTreeMap;

const NEUTRAL_PERCENTILE: f64 = 50.0;
const SCORE_SCALE: f64 = 0.6;
const SCORE_FLOOR: f64 = 40.0;

const LOW_SAMPLE_REPORTS: i32 = 3;
const HIGH_SAMPLE_REPORTS: i32 = 20;
const HIGH_SAMPLE_BONUS: f64 = 1.05;

/// Zero-based ascending positions for every analyst with a value. Ties are broken
/// by analyst id so the ranking is stable across runs.
struct Ranking {
    positions: BTreeMap<AnalystId, usize>,
    len: usize,
}

impl Ranking {
    fn build<F>(metrics: &[AnalystMetrics], value: F) -> Self
    where
        F: Fn(&AnalystMetrics) -> Option<f64>,
    {
        let mut present: Vec<(f64, AnalystId)> = metrics
            .iter()
            .filter_map(|m| value(m).map(|v| (v, m.analyst_id)))
            .collect();
        present.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let len = present.len();
        let positions = present
            .into_iter()
            .enumerate()
            .map(|(rank, (_, id))| (id, rank))
            .collect();
        Self { positions, len }
    }

    /// rank / N × 100: the lowest value gets 0 and the highest stays below 100.
    fn percentile(&self, analyst_id: AnalystId) -> f64 {
        match self.positions.get(&analyst_id) {
            Some(&rank) => rank as f64 / self.len as f64 * 100.0,
            None => NEUTRAL_PERCENTILE,
        }
    }

    /// (N − rank − 1) / N × 100, for metrics where lower is better.
    fn reverse_percentile(&self, analyst_id: AnalystId) -> f64 {
        match self.positions.get(&analyst_id) {
            Some(&rank) => (self.len - rank - 1) as f64 / self.len as f64 * 100.0,
            None => NEUTRAL_PERCENTILE,
        }
    }
}

/// Scales the un-adjusted score by how many reports back it.
pub fn confidence_multiplier(report_count: i32) -> f64 {
    if report_count < LOW_SAMPLE_REPORTS {
        report_count.max(0) as f64 / LOW_SAMPLE_REPORTS as f64
    } else if report_count >= HIGH_SAMPLE_REPORTS {
        HIGH_SAMPLE_BONUS
    } else {
        1.0
    }
}

/// Turns a weighted percentile (0–100) into the published score.
pub fn final_score(weighted_percentile: f64, report_count: i32, score_cap: i32) -> i32 {
    let raw = (weighted_percentile * SCORE_SCALE + SCORE_FLOOR).round();
    let adjusted = (raw * confidence_multiplier(report_count)).round() as i32;
    adjusted.min(score_cap)
}

/// Assigns `composite_score` to every row. Rankings are built over the full set,
/// so this must run after every analyst has been aggregated.
pub fn assign_composite_scores(metrics: &mut [AnalystMetrics], policy: &ScoringPolicy) {
    let by_return = Ranking::build(metrics, |m| Some(m.average_return));
    let by_return_dev = Ranking::build(metrics, |m| m.return_deviation);
    let by_accuracy = Ranking::build(metrics, |m| Some(m.accuracy_rate));
    let by_target_dev = Ranking::build(metrics, |m| m.target_error_deviation);

    let w = &policy.weights;
    for m in metrics.iter_mut() {
        let id = m.analyst_id;
        let weighted = w.average_return * by_return.percentile(id)
            + w.return_deviation * by_return_dev.percentile(id)
            + w.accuracy * by_accuracy.percentile(id)
            + w.target_error_deviation * by_target_dev.reverse_percentile(id);

        let score = final_score(weighted, m.report_count, policy.score_cap);
        tracing::trace!(analyst_id = id, weighted, score, "composite score");
        m.composite_score = Some(score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn metrics(id: AnalystId, accuracy: f64, ret: f64, count: i32) -> AnalystMetrics {
        AnalystMetrics {
            analyst_id: id,
            accuracy_rate: accuracy,
            average_return: ret,
            average_target_error: None,
            return_deviation: Some(ret),
            target_error_deviation: Some(-ret),
            report_count: count,
            composite_score: None,
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn ascending_rank_percentiles() {
        let rows = vec![
            metrics(3, 80.0, 0.0, 5),
            metrics(1, 60.0, 0.0, 5),
            metrics(4, 90.0, 0.0, 5),
            metrics(2, 70.0, 0.0, 5),
        ];
        let r = Ranking::build(&rows, |m| Some(m.accuracy_rate));
        assert_eq!(r.percentile(1), 0.0);
        assert_eq!(r.percentile(2), 25.0);
        assert_eq!(r.percentile(3), 50.0);
        assert_eq!(r.percentile(4), 75.0);

        assert_eq!(r.reverse_percentile(1), 75.0);
        assert_eq!(r.reverse_percentile(4), 0.0);
    }

    #[test]
    fn absent_values_get_neutral_percentile() {
        let mut rows = vec![metrics(1, 60.0, 1.0, 5), metrics(2, 70.0, 2.0, 5)];
        rows[1].return_deviation = None;
        let r = Ranking::build(&rows, |m| m.return_deviation);
        assert_eq!(r.len, 1);
        assert_eq!(r.percentile(1), 0.0);
        assert_eq!(r.percentile(2), 50.0);
        assert_eq!(r.reverse_percentile(2), 50.0);
    }

    #[test]
    fn ties_break_by_analyst_id() {
        let rows = vec![metrics(9, 50.0, 0.0, 5), metrics(2, 50.0, 0.0, 5)];
        let r = Ranking::build(&rows, |m| Some(m.accuracy_rate));
        assert_eq!(r.percentile(2), 0.0);
        assert_eq!(r.percentile(9), 50.0);
    }

    #[test]
    fn confidence_multiplier_steps() {
        assert_eq!(confidence_multiplier(0), 0.0);
        assert!((confidence_multiplier(1) - 1.0 / 3.0).abs() < 1e-12);
        assert!((confidence_multiplier(2) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(confidence_multiplier(3), 1.0);
        assert_eq!(confidence_multiplier(19), 1.0);
        assert_eq!(confidence_multiplier(20), 1.05);
    }

    #[test]
    fn score_band_and_cap() {
        assert_eq!(final_score(0.0, 10, 100), 40);
        assert_eq!(final_score(100.0, 10, 100), 100);
        assert_eq!(final_score(50.0, 10, 100), 70);
        // 100 * 1.05 = 105, capped.
        assert_eq!(final_score(100.0, 25, 100), 100);
        assert_eq!(final_score(100.0, 25, 110), 105);
        // 70 / 3 = 23.33
        assert_eq!(final_score(50.0, 1, 100), 23);
    }

    #[test]
    fn small_sample_scores_below_large_sample() {
        let mut rows = vec![
            metrics(1, 95.0, 30.0, 1),
            metrics(2, 95.0, 30.0, 25),
            metrics(3, 40.0, -5.0, 10),
            metrics(4, 50.0, -2.0, 10),
        ];
        // Same raw metrics for 1 and 2; id order puts 1 below 2 on ties, so give 1 the
        // edge on every metric to make it the top performer.
        rows[0].accuracy_rate = 95.5;
        rows[0].average_return = 30.5;
        rows[0].return_deviation = Some(30.5);
        rows[0].target_error_deviation = Some(-30.5);

        assign_composite_scores(&mut rows, &ScoringPolicy::default());
        let one = rows[0].composite_score.unwrap();
        let many = rows[1].composite_score.unwrap();
        assert!(one < many, "1-report score {one} should be below 25-report score {many}");
        assert!(rows.iter().all(|m| m.composite_score.unwrap() <= 100));
    }

    #[test]
    fn composite_uses_weights() {
        // Two analysts; the better one sits at percentile 50 on every metric.
        let mut rows = vec![metrics(1, 60.0, 1.0, 10), metrics(2, 70.0, 2.0, 10)];
        assign_composite_scores(&mut rows, &ScoringPolicy::default());
        // Analyst 2: 0.30*50 + 0.15*50 + 0.40*50 + 0.15*50 = 50 -> 70.
        assert_eq!(rows[1].composite_score, Some(70));
        // Analyst 1 has the larger target-error deviation (-1 > -2), so it is last on
        // the lower-is-better metric too. Every percentile is 0 -> 40.
        assert_eq!(rows[0].composite_score, Some(40));
    }
}
