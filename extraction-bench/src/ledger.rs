//! Token and cost accounting per test, provider and model

use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tasks::TestId;

/// Price model for one model, in USD per token
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

impl TokenPricing {
    pub fn new(input_per_token: f64, output_per_token: f64) -> Self {
        Self {
            input_per_token,
            output_per_token,
        }
    }
}

/// Token counts and cost of one provider call.
///
/// Totals are derived at construction, so `total_tokens` is always
/// `prompt_tokens + completion_tokens` and `total_cost` is always
/// `prompt_cost + completion_cost`. There are no setters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageMetrics {
    provider_id: String,
    model_id: String,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    prompt_cost: f64,
    completion_cost: f64,
    total_cost: f64,
    elapsed_ms: u64,
}

impl UsageMetrics {
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
        pricing: TokenPricing,
        elapsed: Duration,
    ) -> Self {
        let prompt_cost = prompt_tokens as f64 * pricing.input_per_token;
        let completion_cost = completion_tokens as f64 * pricing.output_per_token;
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn prompt_cost(&self) -> f64 {
        self.prompt_cost
    }

    pub fn completion_cost(&self) -> f64 {
        self.completion_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }
}

/// Which pass of a run produced a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Standard,
    Optimized,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Standard => write!(f, "standard"),
            RunPhase::Optimized => write!(f, "optimized"),
        }
    }
}

/// One recorded call
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub test_id: TestId,
    pub provider_id: String,
    pub model_id: String,
    pub phase: RunPhase,
    pub metrics: UsageMetrics,
}

/// Aggregate over any number of calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
    pub elapsed_ms: u64,
}

impl From<&UsageMetrics> for UsageTotals {
    fn from(m: &UsageMetrics) -> Self {
        Self {
            calls: 1,
            prompt_tokens: m.prompt_tokens,
            completion_tokens: m.completion_tokens,
            total_tokens: m.total_tokens,
            prompt_cost: m.prompt_cost,
            completion_cost: m.completion_cost,
            total_cost: m.total_cost,
            elapsed_ms: m.elapsed_ms,
        }
    }
}

impl Add for UsageTotals {
    type Output = UsageTotals;

    fn add(self, rhs: UsageTotals) -> UsageTotals {
        UsageTotals {
            calls: self.calls + rhs.calls,
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
            prompt_cost: self.prompt_cost + rhs.prompt_cost,
            completion_cost: self.completion_cost + rhs.completion_cost,
            total_cost: self.total_cost + rhs.total_cost,
            elapsed_ms: self.elapsed_ms + rhs.elapsed_ms,
        }
    }
}

impl Sum for UsageTotals {
    fn sum<I: Iterator<Item = UsageTotals>>(iter: I) -> Self {
        iter.fold(UsageTotals::default(), Add::add)
    }
}

/// Summed usage, broken down several ways
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageSummary {
    pub by_test: BTreeMap<String, UsageTotals>,
    pub by_provider: BTreeMap<String, UsageTotals>,
    /// Keyed by `provider/model`
    pub by_model: BTreeMap<String, UsageTotals>,
    pub by_phase: BTreeMap<RunPhase, UsageTotals>,
    pub total: UsageTotals,
}

/// Append-only log of usage records.
///
/// Recording the same (test, provider, model) twice keeps both entries;
/// the phase tag tells a standard run from an optimized re-run.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    entries: Vec<LedgerEntry>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        test_id: &TestId,
        provider_id: &str,
        model_id: &str,
        phase: RunPhase,
        metrics: UsageMetrics,
    ) {
        self.entries.push(LedgerEntry {
            test_id: test_id.clone(),
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            phase,
            metrics,
        });
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summarize(&self) -> UsageSummary {
        let mut summary = UsageSummary::default();

        for entry in &self.entries {
            let totals = UsageTotals::from(&entry.metrics);
            accumulate(&mut summary.by_test, entry.test_id.to_string(), totals);
            accumulate(&mut summary.by_provider, entry.provider_id.clone(), totals);
            accumulate(
                &mut summary.by_model,
                format!("{}/{}", entry.provider_id, entry.model_id),
                totals,
            );
            accumulate(&mut summary.by_phase, entry.phase, totals);
        }

        summary.total = self
            .entries
            .iter()
            .map(|e| UsageTotals::from(&e.metrics))
            .sum();
        summary
    }
}

fn accumulate<K: Ord>(map: &mut BTreeMap<K, UsageTotals>, key: K, totals: UsageTotals) {
    let merged = map.get(&key).copied().unwrap_or_default() + totals;
    map.insert(key, merged);
}
