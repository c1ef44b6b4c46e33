//! Single-pass prompt refinement driven by scoring feedback
//!
//! Tests whose best first-pass score is under the threshold get a revised
//! prompt that spells out the fields the best-scoring cell got wrong,
//! then run once more against the same providers. There is no second round.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::analysis::comparator::ComparisonEngine;
use crate::analysis::scorer::{AccuracyResult, FieldStatus, ROOT_PATH};
use crate::config::OptimizerConfig;
use crate::ledger::{RunPhase, UsageLedger};
use crate::runner::orchestrator::{CellKey, CellResult, Orchestrator, ResultsMap};
use crate::tasks::{TestCase, TestId};

/// Longest rendering of an expected/actual value in guidance lines
const MAX_VALUE_CHARS: usize = 160;

/// Before/after record for one re-prompted test
#[derive(Debug, Clone, Serialize)]
pub struct OptimizedPromptRecord {
    pub test_id: TestId,
    pub original_prompt: String,
    pub revised_prompt: String,
    /// Cell whose score triggered the rewrite
    pub trigger: CellKey,
    pub before: AccuracyResult,
    /// Best result of the re-run, `None` if every re-run cell failed
    pub after: Option<AccuracyResult>,
    /// Every cell of the re-run
    pub rerun: BTreeMap<CellKey, CellResult>,
}

impl OptimizedPromptRecord {
    /// Score change of the best cell, when the re-run produced one
    pub fn improvement(&self) -> Option<f64> {
        self.after.as_ref().map(|after| after.score - self.before.score)
    }
}

/// Rewrites prompts of low-scoring tests and re-runs them once
#[derive(Debug, Clone)]
pub struct PromptOptimizer {
    threshold: f64,
    engine: ComparisonEngine,
}

impl PromptOptimizer {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            engine: ComparisonEngine::new(),
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(config.threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Tests below threshold, with the cell that decided it
    pub fn select<'a>(
        &self,
        first_pass: &'a ResultsMap,
        tests: &'a [TestCase],
    ) -> Vec<(&'a TestCase, &'a CellKey, &'a AccuracyResult)> {
        let mut selected = Vec::new();
        for test in tests {
            let Some(cells) = first_pass.get(&test.id) else {
                continue;
            };
            let Some((key, cell)) = self.engine.best_cell(cells) else {
                tracing::debug!("{}: no scored cell, not optimizing", test.id);
                continue;
            };
            let Some(accuracy) = cell.accuracy.as_ref() else {
                continue;
            };
            if accuracy.score < self.threshold {
                selected.push((test, key, accuracy));
            }
        }
        selected
    }

    /// Re-prompt every test whose best first-pass score is below threshold.
    ///
    /// Re-run usage is recorded in `ledger` under [`RunPhase::Optimized`].
    pub async fn optimize(
        &self,
        orchestrator: &Orchestrator,
        first_pass: &ResultsMap,
        tests: &[TestCase],
        ledger: &mut UsageLedger,
    ) -> BTreeMap<TestId, OptimizedPromptRecord> {
        let selected = self.select(first_pass, tests);
        tracing::info!(
            "{} of {} tests scored below {:.1}; re-prompting",
            selected.len(),
            tests.len(),
            self.threshold
        );

        let mut records = BTreeMap::new();
        for (test, trigger, before) in selected {
            let revised_prompt = revise_prompt(&test.prompt_text, before);
            let revised = test.with_prompt(revised_prompt.clone());

            let rerun = orchestrator
                .run(std::slice::from_ref(&revised), RunPhase::Optimized, ledger)
                .await
                .remove(&test.id)
                .unwrap_or_default();

            let after = self
                .engine
                .best_cell(&rerun)
                .and_then(|(_, cell)| cell.accuracy.clone());

            match &after {
                Some(after) => tracing::info!(
                    "{}: {:.1} -> {:.1} after re-prompt",
                    test.id,
                    before.score,
                    after.score
                ),
                None => tracing::warn!("{}: every re-run cell failed", test.id),
            }

            records.insert(
                test.id.clone(),
                OptimizedPromptRecord {
                    test_id: test.id.clone(),
                    original_prompt: test.prompt_text.clone(),
                    revised_prompt,
                    trigger: trigger.clone(),
                    before: before.clone(),
                    after,
                    rerun,
                },
            );
        }

        records
    }
}

impl Default for PromptOptimizer {
    fn default() -> Self {
        Self::from_config(&OptimizerConfig::default())
    }
}

/// Re-prompt with the default optimizer settings and the given threshold
pub async fn optimize(
    orchestrator: &Orchestrator,
    first_pass: &ResultsMap,
    tests: &[TestCase],
    threshold: f64,
    ledger: &mut UsageLedger,
) -> BTreeMap<TestId, OptimizedPromptRecord> {
    PromptOptimizer::new(threshold)
        .optimize(orchestrator, first_pass, tests, ledger)
        .await
}

/// New prompt: the original followed by one corrective line per missed field
pub fn revise_prompt(original: &str, before: &AccuracyResult) -> String {
    let mut lines = Vec::new();

    if before.is_unparseable() {
        lines.push(
            "- The previous reply could not be read as JSON. Reply with one JSON object and nothing else."
                .to_string(),
        );
    }

    for miss in before.misses() {
        if miss.status == FieldStatus::Unparseable {
            continue;
        }
        let path = display_path(&miss.path);
        let expected = render_value(&miss.expected);
        let line = match (&miss.status, &miss.actual) {
            (FieldStatus::Missing, _) | (_, None) => {
                format!("- `{}` was missing; it should be {}", path, expected)
            }
            (_, Some(actual)) => format!(
                "- `{}` should be {}, not {}",
                path,
                expected,
                render_value(actual)
            ),
        };
        lines.push(line);
    }

    format!(
        "{}\n\nA previous attempt got these fields wrong. Correct them:\n{}",
        original.trim_end(),
        lines.join("\n")
    )
}

fn display_path(path: &str) -> &str {
    match path.strip_prefix(ROOT_PATH) {
        Some(rest) if rest.is_empty() => "(root)",
        Some(rest) => rest.strip_prefix('.').unwrap_or(rest),
        None => path,
    }
}

fn render_value(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= MAX_VALUE_CHARS {
        return rendered;
    }
    let cut: String = rendered.chars().take(MAX_VALUE_CHARS).collect();
    format!("{}...", cut)
}
