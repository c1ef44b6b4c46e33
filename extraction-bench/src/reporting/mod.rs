//! Results reporting: console summary and JSON dump

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::analysis::{AggregatedResults, ComparisonResult};
use crate::ledger::UsageSummary;
use crate::optimizer::OptimizedPromptRecord;
use crate::runner::ResultsMap;
use crate::tasks::TestId;

/// Provider ranking in summary
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRanking {
    pub provider: String,
    pub wins: u32,
    pub avg_score: f64,
}

/// Module leader info
#[derive(Debug, Clone, Serialize)]
pub struct ModuleLeader {
    pub leader: String,
    pub margin: f64,
}

/// One skipped test case, as reported
#[derive(Debug, Clone, Serialize)]
pub struct SkippedTest {
    pub test: Option<String>,
    pub kind: String,
    pub message: String,
}

/// Everything a run produced, ready to serialize
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub run_id: String,
    pub timestamp: String,
    pub total_tests: usize,
    pub provider_rankings: Vec<ProviderRanking>,
    pub module_breakdown: BTreeMap<String, ModuleLeader>,
    pub aggregated: &'a AggregatedResults,
    pub comparisons: &'a [ComparisonResult],
    pub results: &'a ResultsMap,
    pub optimized: &'a BTreeMap<TestId, OptimizedPromptRecord>,
    pub usage: &'a UsageSummary,
    pub skipped: Vec<SkippedTest>,
}

impl<'a> RunReport<'a> {
    pub fn new(
        run_id: impl Into<String>,
        aggregated: &'a AggregatedResults,
        comparisons: &'a [ComparisonResult],
        results: &'a ResultsMap,
        optimized: &'a BTreeMap<TestId, OptimizedPromptRecord>,
        usage: &'a UsageSummary,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            total_tests: aggregated.total_tests,
            provider_rankings: provider_rankings(aggregated),
            module_breakdown: module_leaders(aggregated),
            aggregated,
            comparisons,
            results,
            optimized,
            usage,
            skipped: Vec::new(),
        }
    }

    pub fn with_skipped(mut self, skipped: Vec<SkippedTest>) -> Self {
        self.skipped = skipped;
        self
    }

    /// Write to JSON file, creating parent directories
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)
    }
}

/// Providers by average score, best first
pub fn provider_rankings(aggregated: &AggregatedResults) -> Vec<ProviderRanking> {
    let mut rankings: Vec<ProviderRanking> = aggregated
        .avg_scores_by_provider
        .iter()
        .map(|(provider, &score)| ProviderRanking {
            provider: provider.clone(),
            wins: *aggregated.wins_by_provider.get(provider).unwrap_or(&0),
            avg_score: score,
        })
        .collect();

    rankings.sort_by(|a, b| {
        b.avg_score
            .partial_cmp(&a.avg_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rankings
}

fn module_leaders(aggregated: &AggregatedResults) -> BTreeMap<String, ModuleLeader> {
    aggregated
        .scores_by_module
        .iter()
        .filter_map(|(module, providers)| {
            let mut sorted: Vec<_> = providers.iter().collect();
            sorted.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));

            let leader = sorted.first()?;
            let margin = sorted.get(1).map(|second| leader.1 - second.1).unwrap_or(0.0);
            Some((
                module.clone(),
                ModuleLeader {
                    leader: leader.0.clone(),
                    margin,
                },
            ))
        })
        .collect()
}

/// Generate a console report
pub fn print_console_report(
    aggregated: &AggregatedResults,
    usage: &UsageSummary,
    optimized: &BTreeMap<TestId, OptimizedPromptRecord>,
) {
    println!("\n=== Extraction Accuracy Results ===\n");
    println!("Total Tests: {}\n", aggregated.total_tests);

    println!("Provider Rankings:");
    println!("{:-<50}", "");
    for (i, ranking) in provider_rankings(aggregated).iter().enumerate() {
        println!(
            "  {}. {} - Avg Score: {:.1}, Wins: {}",
            i + 1,
            ranking.provider,
            ranking.avg_score,
            ranking.wins
        );
    }

    if !aggregated.avg_scores_by_model.is_empty() {
        println!("\nScores by Model:");
        println!("{:-<50}", "");
        for (model, score) in &aggregated.avg_scores_by_model {
            println!("  {}: {:.1}", model, score);
        }
    }

    if !aggregated.scores_by_module.is_empty() {
        println!("\nScores by Module:");
        println!("{:-<50}", "");
        for (module, providers) in &aggregated.scores_by_module {
            println!("  {}:", module);
            let mut sorted: Vec<_> = providers.iter().collect();
            sorted.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (provider, score) in sorted {
                println!("    {}: {:.1}", provider, score);
            }
        }
    }

    if !aggregated.failures_by_kind.is_empty() {
        println!("\nFailures:");
        println!("{:-<50}", "");
        for (kind, count) in &aggregated.failures_by_kind {
            println!("  {}: {}", kind, count);
        }
    }

    if !optimized.is_empty() {
        println!("\nPrompt Optimization:");
        println!("{:-<50}", "");
        for (test_id, record) in optimized {
            match &record.after {
                Some(after) => println!(
                    "  {}: {:.1} -> {:.1}",
                    test_id, record.before.score, after.score
                ),
                None => println!("  {}: {:.1} -> (failed)", test_id, record.before.score),
            }
        }
    }

    println!("\nUsage:");
    println!("{:-<50}", "");
    for (provider, totals) in &usage.by_provider {
        println!(
            "  {}: {} calls, {} tokens, ${:.4}",
            provider, totals.calls, totals.total_tokens, totals.total_cost
        );
    }
    println!(
        "  total: {} calls, {} tokens, ${:.4}",
        usage.total.calls, usage.total.total_tokens, usage.total.total_cost
    );

    println!("\n{:=<50}", "");
}
