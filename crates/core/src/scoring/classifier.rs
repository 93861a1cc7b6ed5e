use crate::domain::report::{Opinion, OpinionLabel};
use crate::scoring::policy::ThresholdSet;

impl ThresholdSet {
    /// Three-way category used for scoring and opinion-change detection.
    /// Non-finite input has no category.
    pub fn classify3(&self, score: f64) -> Option<Opinion> {
        if !score.is_finite() {
            return None;
        }
        Some(if score >= self.bullish_min {
            Opinion::Bullish
        } else if score >= self.neutral_min {
            Opinion::Neutral
        } else {
            Opinion::Bearish
        })
    }

    /// Five-way display label.
    pub fn classify5(&self, score: f64) -> Option<OpinionLabel> {
        if !score.is_finite() {
            return None;
        }
        Some(if score >= self.strong_bullish_label_min {
            OpinionLabel::StrongBullish
        } else if score >= self.bullish_label_min {
            OpinionLabel::Bullish
        } else if score >= self.neutral_label_min {
            OpinionLabel::Neutral
        } else if score >= self.bearish_label_min {
            OpinionLabel::Bearish
        } else {
            OpinionLabel::StrongBearish
        })
    }

    pub fn category_of(&self, conviction: Option<f64>) -> Option<Opinion> {
        conviction.and_then(|s| self.classify3(s))
    }
}
