//! Cross-provider comparison engine

use std::collections::BTreeMap;
use serde::Serialize;

use crate::error::ErrorKind;
use crate::runner::orchestrator::{CellKey, CellResult, ResultsMap};
use crate::tasks::TestId;

/// Score of one provider/model on a test
#[derive(Debug, Clone, Serialize)]
pub struct CellScore {
    pub key: CellKey,
    pub score: f64,
    pub success: bool,
}

/// Result of comparing providers on a single test
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub test_id: TestId,
    /// Scored cells, best first; ties keep provider/model order
    pub ranked: Vec<CellScore>,
    pub winner: Option<CellKey>,
    pub margin: Option<f64>,
    /// Cells whose call failed, so they carry no score
    pub failed: Vec<CellKey>,
}

/// Aggregated results across multiple tests
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedResults {
    pub total_tests: usize,
    pub wins_by_provider: BTreeMap<String, u32>,
    pub avg_scores_by_provider: BTreeMap<String, f64>,
    /// Keyed by `provider/model`
    pub avg_scores_by_model: BTreeMap<String, f64>,
    /// module → provider → average score
    pub scores_by_module: BTreeMap<String, BTreeMap<String, f64>>,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
}

/// Comparison engine for ranking cells across providers
#[derive(Debug, Clone, Copy, Default)]
pub struct ComparisonEngine;

impl ComparisonEngine {
    pub fn new() -> Self {
        Self
    }

    /// Rank the cells of one test
    pub fn compare_test(&self, test_id: &TestId, cells: &BTreeMap<CellKey, CellResult>) -> ComparisonResult {
        let mut ranked: Vec<CellScore> = cells
            .iter()
            .filter_map(|(key, cell)| {
                cell.accuracy.as_ref().map(|acc| CellScore {
                    key: key.clone(),
                    score: acc.score,
                    success: acc.success,
                })
            })
            .collect();

        // Stable: equal scores stay in key order
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let winner = ranked.first().map(|s| s.key.clone());
        let margin = match ranked.as_slice() {
            [first, second, ..] => Some(first.score - second.score),
            _ => None,
        };

        let failed = cells
            .iter()
            .filter(|(_, cell)| cell.is_failed())
            .map(|(key, _)| key.clone())
            .collect();

        ComparisonResult {
            test_id: test_id.clone(),
            ranked,
            winner,
            margin,
            failed,
        }
    }

    /// Rank every test in a results map
    pub fn compare_all(&self, results: &ResultsMap) -> Vec<ComparisonResult> {
        results
            .iter()
            .map(|(test_id, cells)| self.compare_test(test_id, cells))
            .collect()
    }

    /// Highest-scoring cell of a test, if any cell was scored
    pub fn best_cell<'a>(
        &self,
        cells: &'a BTreeMap<CellKey, CellResult>,
    ) -> Option<(&'a CellKey, &'a CellResult)> {
        cells
            .iter()
            .filter(|(_, cell)| cell.accuracy.is_some())
            .fold(None, |best: Option<(&CellKey, &CellResult)>, candidate| match best {
                Some(current) if current.1.score() >= candidate.1.score() => Some(current),
                _ => Some(candidate),
            })
    }

    /// Wins, averages and failure counts over a whole run
    pub fn aggregate(&self, results: &ResultsMap) -> AggregatedResults {
        let mut wins: BTreeMap<String, u32> = BTreeMap::new();
        let mut by_provider: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut by_model: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut by_module: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
        let mut failures: BTreeMap<ErrorKind, usize> = BTreeMap::new();

        for (test_id, cells) in results {
            let comparison = self.compare_test(test_id, cells);
            if let Some(winner) = &comparison.winner {
                *wins.entry(winner.provider.clone()).or_insert(0) += 1;
            }

            for (key, cell) in cells {
                if let Some(kind) = cell.error_kind() {
                    *failures.entry(kind).or_insert(0) += 1;
                }
                let Some(score) = cell.score() else {
                    continue;
                };
                by_provider.entry(key.provider.clone()).or_default().push(score);
                by_model.entry(key.to_string()).or_default().push(score);
                by_module
                    .entry(test_id.module.clone())
                    .or_default()
                    .entry(key.provider.clone())
                    .or_default()
                    .push(score);
            }
        }

        AggregatedResults {
            total_tests: results.len(),
            wins_by_provider: wins,
            avg_scores_by_provider: averages(by_provider),
            avg_scores_by_model: averages(by_model),
            scores_by_module: by_module
                .into_iter()
                .map(|(module, providers)| (module, averages(providers)))
                .collect(),
            failures_by_kind: failures,
        }
    }
}

fn averages(scores: BTreeMap<String, Vec<f64>>) -> BTreeMap<String, f64> {
    scores
        .into_iter()
        .map(|(k, v)| {
            let avg = if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            };
            (k, avg)
        })
        .collect()
}
