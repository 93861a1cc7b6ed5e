use crate::domain::metrics::{AnalystMetrics, AnalystProfile};
use crate::domain::report::{AnalystId, Stock};
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Metric a ranking is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RankingKey {
    Accuracy,
    Return,
    TargetError,
    #[default]
    Composite,
}

impl RankingKey {
    fn value(self, m: &AnalystMetrics) -> Option<f64> {
        match self {
            RankingKey::Accuracy => Some(m.accuracy_rate),
            RankingKey::Return => Some(m.average_return),
            RankingKey::TargetError => m.average_target_error,
            RankingKey::Composite => m.composite_score.map(f64::from),
        }
    }

    fn lower_is_better(self) -> bool {
        matches!(self, RankingKey::TargetError)
    }
}

impl FromStr for RankingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "accuracy" | "accuracyRate" => Ok(RankingKey::Accuracy),
            "return" | "returnRate" => Ok(RankingKey::Return),
            "targetError" | "targetDiffRate" => Ok(RankingKey::TargetError),
            "composite" | "aimsScore" => Ok(RankingKey::Composite),
            other => bail!("unknown sort key: {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedAnalyst {
    pub rank: u32,
    #[serde(flatten)]
    pub profile: AnalystProfile,
}

/// Sorts profiles by `key` and assigns 1-based ranks. Profiles without a value
/// for the key are left out; ties go to the lower analyst id.
pub fn rank_profiles(profiles: Vec<AnalystProfile>, key: RankingKey) -> Vec<RankedAnalyst> {
    let mut keyed: Vec<(f64, AnalystProfile)> = profiles
        .into_iter()
        .filter_map(|p| key.value(&p.metrics).map(|v| (v, p)))
        .collect();

    keyed.sort_by(|(a, pa), (b, pb)| {
        let by_value: Ordering = if key.lower_is_better() {
            a.total_cmp(b)
        } else {
            b.total_cmp(a)
        };
        by_value.then_with(|| pa.analyst.id.cmp(&pb.analyst.id))
    });

    keyed
        .into_iter()
        .zip(1u32..)
        .map(|((_, profile), rank)| RankedAnalyst { rank, profile })
        .collect()
}

/// Keeps only analysts in `covering`, e.g. those who published on one stock.
pub fn restrict_to(profiles: Vec<AnalystProfile>, covering: &BTreeSet<AnalystId>) -> Vec<AnalystProfile> {
    profiles
        .into_iter()
        .filter(|p| covering.contains(&p.analyst.id))
        .collect()
}

/// A stock an analyst has published on, with how many reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoveredStock {
    #[serde(flatten)]
    pub stock: Stock,
    pub report_count: i64,
}

/// Most-covered first; ties go to the lower stock id.
pub fn rank_covered_stocks(mut stocks: Vec<CoveredStock>) -> Vec<CoveredStock> {
    stocks.sort_by(|a, b| {
        b.report_count
            .cmp(&a.report_count)
            .then_with(|| a.stock.id.cmp(&b.stock.id))
    });
    stocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::Analyst;
    use chrono::{TimeZone, Utc};

    fn profile(id: AnalystId, accuracy: f64, target_error: Option<f64>, score: Option<i32>) -> AnalystProfile {
        AnalystProfile {
            analyst: Analyst {
                id,
                name: format!("Analyst {id}"),
                firm_name: None,
            },
            metrics: AnalystMetrics {
                analyst_id: id,
                accuracy_rate: accuracy,
                average_return: accuracy / 10.0,
                average_target_error: target_error,
                return_deviation: None,
                target_error_deviation: None,
                report_count: 5,
                composite_score: score,
                updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
        }
    }

    fn ids(ranked: &[RankedAnalyst]) -> Vec<AnalystId> {
        ranked.iter().map(|r| r.profile.analyst.id).collect()
    }

    #[test]
    fn accepts_current_and_legacy_key_names() {
        assert_eq!("accuracy".parse::<RankingKey>().unwrap(), RankingKey::Accuracy);
        assert_eq!("accuracyRate".parse::<RankingKey>().unwrap(), RankingKey::Accuracy);
        assert_eq!("returnRate".parse::<RankingKey>().unwrap(), RankingKey::Return);
        assert_eq!("targetDiffRate".parse::<RankingKey>().unwrap(), RankingKey::TargetError);
        assert_eq!("aimsScore".parse::<RankingKey>().unwrap(), RankingKey::Composite);
        assert!("popularity".parse::<RankingKey>().is_err());
        assert_eq!(RankingKey::default(), RankingKey::Composite);
    }

    #[test]
    fn higher_is_better_keys_sort_descending() {
        let ranked = rank_profiles(
            vec![
                profile(1, 50.0, None, Some(60)),
                profile(2, 80.0, None, Some(90)),
                profile(3, 65.0, None, Some(75)),
            ],
            RankingKey::Accuracy,
        );
        assert_eq!(ids(&ranked), vec![2, 3, 1]);
        assert_eq!(ranked.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn target_error_sorts_ascending_and_drops_absent_values() {
        let ranked = rank_profiles(
            vec![
                profile(1, 50.0, Some(12.0), Some(60)),
                profile(2, 80.0, None, Some(90)),
                profile(3, 65.0, Some(4.0), Some(75)),
            ],
            RankingKey::TargetError,
        );
        assert_eq!(ids(&ranked), vec![3, 1]);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn composite_ties_break_by_analyst_id() {
        let ranked = rank_profiles(
            vec![
                profile(9, 50.0, None, Some(70)),
                profile(4, 60.0, None, Some(70)),
                profile(5, 60.0, None, None),
            ],
            RankingKey::Composite,
        );
        assert_eq!(ids(&ranked), vec![4, 9]);
    }

    #[test]
    fn ranked_rows_serialize_flat() {
        let ranked = rank_profiles(vec![profile(7, 50.0, Some(3.5), Some(61))], RankingKey::TargetError);
        let v = serde_json::to_value(&ranked[0]).unwrap();
        assert_eq!(v["rank"], 1);
        assert_eq!(v["analyst"]["id"], 7);
        assert_eq!(v["metrics"]["average_target_error"], 3.5);
        assert_eq!(serde_json::to_value(RankingKey::TargetError).unwrap(), "targetError");
    }

    #[test]
    fn stock_scope_keeps_covering_analysts_only() {
        let all = vec![
            profile(1, 50.0, None, Some(60)),
            profile(2, 80.0, None, Some(90)),
            profile(3, 65.0, None, Some(75)),
        ];
        let covering: BTreeSet<AnalystId> = [1, 3].into_iter().collect();
        let ranked = rank_profiles(restrict_to(all, &covering), RankingKey::Composite);
        assert_eq!(ids(&ranked), vec![3, 1]);
        assert_eq!(ranked[0].rank, 1);
    }

    fn covered(id: i64, report_count: i64) -> CoveredStock {
        CoveredStock {
            stock: Stock {
                id,
                code: format!("{id:06}"),
                name: format!("Stock {id}"),
                sector: Some("IT".to_string()),
            },
            report_count,
        }
    }

    #[test]
    fn covered_stocks_sort_by_count_then_id() {
        let ranked = rank_covered_stocks(vec![covered(3, 2), covered(1, 5), covered(2, 2)]);
        let order: Vec<_> = ranked.iter().map(|c| (c.stock.id, c.report_count)).collect();
        assert_eq!(order, vec![(1, 5), (2, 2), (3, 2)]);

        let v = serde_json::to_value(&ranked[0]).unwrap();
        assert_eq!(v["code"], "000001");
        assert_eq!(v["sector"], "IT");
        assert_eq!(v["report_count"], 5);
    }
}
