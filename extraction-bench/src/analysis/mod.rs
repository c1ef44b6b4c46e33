//! Response analysis: per-field scoring and cross-provider comparison

pub mod comparator;
pub mod scorer;

pub use comparator::{AggregatedResults, CellScore, ComparisonEngine, ComparisonResult};
pub use scorer::{score, AccuracyResult, AccuracyScorer, FieldResult, FieldStatus};
