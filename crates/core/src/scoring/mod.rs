pub mod aggregator;
pub mod classifier;
pub mod consensus;
pub mod engine;
pub mod evaluator;
pub mod opinion_change;
pub mod percentile;
pub mod policy;
pub mod prices;

pub use engine::{recompute, Corpus, RecomputeOutcome};
pub use policy::ScoringPolicy;
