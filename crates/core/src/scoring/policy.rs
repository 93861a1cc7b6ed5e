use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DEFAULT_NEUTRAL_BAND_PCT: f64 = 15.0;
const DEFAULT_SCORE_CAP: i32 = 100;

/// Stated/hidden conflict check splits at this conviction, independent of the
/// three-way thresholds.
pub const MISMATCH_MIDPOINT: f64 = 0.5;

/// Named threshold revisions. The cut-points changed over time; every run records
/// which one it used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdVersion {
    V1,
    V2,
}

impl ThresholdVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdVersion::V1 => "v1",
            ThresholdVersion::V2 => "v2",
        }
    }
}

impl fmt::Display for ThresholdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" => Ok(ThresholdVersion::V1),
            "v2" => Ok(ThresholdVersion::V2),
            other => bail!("unknown threshold version: {other:?} (expected v1 or v2)"),
        }
    }
}

/// Cut-points for the opinion classifier. A score at or above a cut-point belongs
/// to the more bullish side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub version: ThresholdVersion,
    pub bullish_min: f64,
    pub neutral_min: f64,
    pub strong_bullish_label_min: f64,
    pub bullish_label_min: f64,
    pub neutral_label_min: f64,
    pub bearish_label_min: f64,
}

impl ThresholdSet {
    pub fn for_version(version: ThresholdVersion) -> Self {
        let (bullish_min, neutral_min) = match version {
            ThresholdVersion::V1 => (0.5, 0.17),
            ThresholdVersion::V2 => (0.75, 0.4),
        };
        Self {
            version,
            bullish_min,
            neutral_min,
            strong_bullish_label_min: 0.96,
            bullish_label_min: 0.75,
            neutral_label_min: 0.4,
            bearish_label_min: 0.1,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let all = [
            self.bullish_min,
            self.neutral_min,
            self.strong_bullish_label_min,
            self.bullish_label_min,
            self.neutral_label_min,
            self.bearish_label_min,
        ];
        ensure!(
            all.iter().all(|v| (0.0..=1.0).contains(v)),
            "thresholds must be between 0 and 1: {self:?}"
        );
        ensure!(
            self.neutral_min <= self.bullish_min,
            "three-way neutral cut ({}) must not exceed bullish cut ({})",
            self.neutral_min,
            self.bullish_min
        );
        ensure!(
            self.strong_bullish_label_min > self.bullish_label_min
                && self.bullish_label_min > self.neutral_label_min
                && self.neutral_label_min > self.bearish_label_min,
            "five-way cut-points must be strictly descending: {self:?}"
        );
        Ok(())
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self::for_version(ThresholdVersion::V2)
    }
}

/// Which reports an analyst is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineScope {
    #[default]
    Sector,
    Global,
}

impl BaselineScope {
    pub fn as_str(self) -> &'static str {
        match self {
            BaselineScope::Sector => "sector",
            BaselineScope::Global => "global",
        }
    }
}

impl FromStr for BaselineScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sector" => Ok(BaselineScope::Sector),
            "global" => Ok(BaselineScope::Global),
            other => bail!("unknown baseline scope: {other:?} (expected sector or global)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub average_return: f64,
    pub return_deviation: f64,
    pub accuracy: f64,
    pub target_error_deviation: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            average_return: 0.30,
            return_deviation: 0.15,
            accuracy: 0.40,
            target_error_deviation: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub thresholds: ThresholdSet,
    /// Neutral calls are correct when the realized return stays within ± this many
    /// percentage points.
    pub neutral_band_pct: f64,
    pub baseline: BaselineScope,
    pub weights: ScoreWeights,
    pub score_cap: i32,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            thresholds: ThresholdSet::default(),
            neutral_band_pct: DEFAULT_NEUTRAL_BAND_PCT,
            baseline: BaselineScope::default(),
            weights: ScoreWeights::default(),
            score_cap: DEFAULT_SCORE_CAP,
        }
    }
}

impl ScoringPolicy {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("AIMS_THRESHOLD_VERSION") {
            let version = s.parse().context("invalid AIMS_THRESHOLD_VERSION")?;
            out.thresholds = ThresholdSet::for_version(version);
        }

        if let Ok(s) = std::env::var("AIMS_BASELINE_SCOPE") {
            out.baseline = s.parse().context("invalid AIMS_BASELINE_SCOPE")?;
        }

        if let Ok(s) = std::env::var("AIMS_SCORE_CAP") {
            out.score_cap = s
                .trim()
                .parse()
                .with_context(|| format!("invalid AIMS_SCORE_CAP: {s:?}"))?;
        }

        if let Ok(s) = std::env::var("AIMS_NEUTRAL_BAND_PCT") {
            out.neutral_band_pct = s
                .trim()
                .parse()
                .with_context(|| format!("invalid AIMS_NEUTRAL_BAND_PCT: {s:?}"))?;
        }

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.thresholds.validate()?;
        ensure!(
            self.neutral_band_pct.is_finite() && self.neutral_band_pct >= 0.0,
            "neutral band must be a non-negative number (got {})",
            self.neutral_band_pct
        );
        ensure!(
            self.score_cap > 0,
            "score cap must be positive (got {})",
            self.score_cap
        );
        Ok(())
    }
}
