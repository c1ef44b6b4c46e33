//! Prompt optimization over a scripted provider

mod common;

use std::sync::Arc;

use common::{config_for, prompt_of, registry, ScriptedProvider};
use extraction_bench::ledger::{RunPhase, UsageLedger};
use extraction_bench::optimizer::PromptOptimizer;
use extraction_bench::runner::Orchestrator;
use extraction_bench::tasks::{TestCase, TestId};
use serde_json::json;

const REVISED_MARKER: &str = "Correct them";

fn posting() -> TestCase {
    TestCase::new(
        TestId::new("jobs", "posting"),
        "Senior Rust Engineer, Oslo office, remote friendly, core team.",
        "Extract the job posting.",
        json!({
            "title": "Senior Rust Engineer",
            "city": "Oslo",
            "remote": true,
            "level": "senior",
            "team": "core"
        }),
    )
}

fn tagged() -> TestCase {
    TestCase::new(
        TestId::new("jobs", "tagged"),
        "Rust role, tags t0 through t9.",
        "Extract the title and tags.",
        json!({
            "title": "Rust",
            "tags": ["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", "t8", "t9"]
        }),
    )
}

fn responder(request: &extraction_bench::providers::CompletionRequest) -> String {
    let prompt = prompt_of(request);
    if prompt.contains("tags t0") {
        // title plus 7 of 10 tags: 50 + 35
        return r#"{"title": "Rust", "tags": ["t0", "t1", "t2", "t3", "t4", "t5", "t6", "x", "y", "z"]}"#
            .to_string();
    }
    if prompt.contains(REVISED_MARKER) {
        r#"{"title": "Senior Rust Engineer", "city": "Oslo", "remote": true, "level": "senior", "team": "core"}"#
            .to_string()
    } else {
        // 2 of 5 fields
        r#"{"title": "Senior Rust Engineer", "city": "Oslo", "remote": false}"#.to_string()
    }
}

fn orchestrator() -> (Orchestrator, Arc<ScriptedProvider>) {
    let mock = Arc::new(ScriptedProvider::new("mock").with_responder(responder));
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 2));
    (orchestrator, mock)
}

#[tokio::test]
async fn test_low_score_produces_one_record() {
    let (orchestrator, mock) = orchestrator();
    let tests = vec![posting()];
    let mut ledger = UsageLedger::new();

    let first_pass = orchestrator.run(&tests, RunPhase::Standard, &mut ledger).await;
    let optimizer = PromptOptimizer::from_config(&orchestrator.config().benchmark.optimizer);
    let records = optimizer
        .optimize(&orchestrator, &first_pass, &tests, &mut ledger)
        .await;

    assert_eq!(records.len(), 1);
    let record = &records[&TestId::new("jobs", "posting")];
    assert_eq!(record.before.score, 40.0);
    assert_eq!(record.after.as_ref().map(|a| a.score), Some(100.0));
    assert_eq!(record.improvement(), Some(60.0));
    assert!(record.revised_prompt.contains("`remote` should be true, not false"));
    assert!(record.revised_prompt.contains("`level` was missing"));
    assert_eq!(record.trigger.provider, "mock");
    assert_eq!(mock.calls(), 2);

    let summary = ledger.summarize();
    assert_eq!(summary.by_phase[&RunPhase::Standard].calls, 1);
    assert_eq!(summary.by_phase[&RunPhase::Optimized].calls, 1);
}

#[tokio::test]
async fn test_high_score_produces_no_record() {
    let (orchestrator, mock) = orchestrator();
    let tests = vec![tagged()];
    let mut ledger = UsageLedger::new();

    let first_pass = orchestrator.run(&tests, RunPhase::Standard, &mut ledger).await;
    let best = first_pass[&TestId::new("jobs", "tagged")]
        .values()
        .find_map(|cell| cell.score());
    assert_eq!(best, Some(85.0));

    let records = PromptOptimizer::new(70.0)
        .optimize(&orchestrator, &first_pass, &tests, &mut ledger)
        .await;

    assert!(records.is_empty());
    assert_eq!(mock.calls(), 1);
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn test_only_low_tests_are_rerun() {
    let (orchestrator, mock) = orchestrator();
    let tests = vec![posting(), tagged()];
    let mut ledger = UsageLedger::new();

    let first_pass = orchestrator.run(&tests, RunPhase::Standard, &mut ledger).await;
    let records = extraction_bench::optimizer::optimize(&orchestrator, &first_pass, &tests, 70.0, &mut ledger).await;

    assert_eq!(records.len(), 1);
    assert!(records.contains_key(&TestId::new("jobs", "posting")));
    assert_eq!(mock.calls(), 3);
}
