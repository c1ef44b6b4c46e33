//! Orchestrator behavior against scripted providers

mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{config_for, prompt_of, registry, write_case, ScriptedProvider, Step};
use extraction_bench::error::ErrorKind;
use extraction_bench::ledger::{RunPhase, UsageLedger};
use extraction_bench::runner::{CellKey, Orchestrator, ResultsMap, RunState, StopSignal};
use extraction_bench::tasks::{TestCase, TestId};
use serde_json::json;

const JOB_REPLY: &str = r#"{"title": "Rust Engineer", "city": "Oslo"}"#;

fn job_case(name: &str) -> TestCase {
    TestCase::new(
        TestId::new("jobs", name),
        "We are hiring a Rust Engineer in Oslo.",
        "Extract the job title and city.",
        json!({"title": "Rust Engineer", "city": "Oslo"}),
    )
}

fn cell<'a>(results: &'a ResultsMap, test: &str, provider: &str) -> &'a extraction_bench::runner::CellResult {
    &results[&TestId::new("jobs", test)][&CellKey::new(provider, format!("{}-model", provider))]
}

fn scores(results: &ResultsMap) -> BTreeMap<(TestId, CellKey), Option<f64>> {
    results
        .iter()
        .flat_map(|(id, cells)| {
            cells
                .iter()
                .map(move |(key, cell)| ((id.clone(), key.clone()), cell.score()))
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_two_timeouts_then_success() {
    let mock = Arc::new(
        ScriptedProvider::new("mock")
            .with_script(vec![Step::Hang, Step::Hang])
            .with_responder(|_| JOB_REPLY.to_string()),
    );
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 2));
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a")], RunPhase::Standard, &mut ledger)
        .await;

    let cell = cell(&results, "a", "mock");
    assert_eq!(cell.attempts, 3);
    assert!(cell.error.is_none());
    assert_eq!(cell.score(), Some(100.0));
    assert!(cell.accuracy.as_ref().unwrap().success);
    assert_eq!(mock.calls(), 3);
    assert_eq!(ledger.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_three_timeouts_fail_the_cell() {
    let mock = Arc::new(
        ScriptedProvider::new("mock").with_script(vec![Step::Hang, Step::Hang, Step::Hang]),
    );
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 2));
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a")], RunPhase::Standard, &mut ledger)
        .await;

    let cell = cell(&results, "a", "mock");
    assert_eq!(cell.attempts, 3);
    assert!(cell.accuracy.is_none());
    assert!(cell.usage.is_none());
    assert_eq!(cell.error_kind(), Some(ErrorKind::ProviderCallError));
    assert!(ledger.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_api_error_is_retried() {
    let mock = Arc::new(
        ScriptedProvider::new("mock")
            .with_script(vec![Step::ServerError])
            .with_responder(|_| JOB_REPLY.to_string()),
    );
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 2));
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a")], RunPhase::Standard, &mut ledger)
        .await;

    assert_eq!(cell(&results, "a", "mock").attempts, 2);
    assert_eq!(cell(&results, "a", "mock").score(), Some(100.0));
}

#[tokio::test]
async fn test_unavailable_is_not_retried_and_sticks_to_the_provider() {
    let mock = Arc::new(ScriptedProvider::new("mock").with_script(vec![Step::Unavailable]));
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 1));
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a"), job_case("b")], RunPhase::Standard, &mut ledger)
        .await;

    assert_eq!(mock.calls(), 1);
    let first = cell(&results, "a", "mock");
    assert_eq!(first.attempts, 1);
    assert_eq!(first.error_kind(), Some(ErrorKind::ProviderUnavailable));
    assert!(first.accuracy.is_none());

    let second = cell(&results, "b", "mock");
    assert_eq!(second.attempts, 0);
    assert_eq!(second.error_kind(), Some(ErrorKind::ProviderUnavailable));
}

#[tokio::test]
async fn test_unavailable_provider_does_not_affect_others() {
    let down = Arc::new(ScriptedProvider::new("down").with_script(vec![Step::Unavailable]));
    let up = Arc::new(ScriptedProvider::new("up").with_responder(|_| JOB_REPLY.to_string()));
    let orchestrator = Orchestrator::new(
        registry(&[("down", down), ("up", up)]),
        config_for(&["down", "up"], 2),
    );
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a")], RunPhase::Standard, &mut ledger)
        .await;

    assert_eq!(cell(&results, "a", "down").error_kind(), Some(ErrorKind::ProviderUnavailable));
    assert_eq!(cell(&results, "a", "up").score(), Some(100.0));
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn test_unsupported_input_is_not_retried() {
    let mock = Arc::new(ScriptedProvider::new("mock").with_script(vec![Step::Unsupported]));
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 1));
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a")], RunPhase::Standard, &mut ledger)
        .await;

    let cell = cell(&results, "a", "mock");
    assert_eq!(cell.attempts, 1);
    assert_eq!(cell.error_kind(), Some(ErrorKind::UnsupportedInput));
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_attachments_rejected_without_calling_backend() {
    let mock = Arc::new(ScriptedProvider::new("mock").with_responder(|_| JOB_REPLY.to_string()));
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 1));
    let mut ledger = UsageLedger::new();

    let test = job_case("a").with_files(vec![PathBuf::from("scan.png")]);
    let results = orchestrator.run(&[test], RunPhase::Standard, &mut ledger).await;

    assert_eq!(cell(&results, "a", "mock").error_kind(), Some(ErrorKind::UnsupportedInput));
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_unparseable_reply_scores_zero_and_keeps_usage() {
    let mock = Arc::new(
        ScriptedProvider::new("mock").with_responder(|_| "Sorry, I cannot help with that.".to_string()),
    );
    let orchestrator = Orchestrator::new(registry(&[("mock", mock)]), config_for(&["mock"], 1));
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a")], RunPhase::Standard, &mut ledger)
        .await;

    let cell = cell(&results, "a", "mock");
    let accuracy = cell.accuracy.as_ref().unwrap();
    assert_eq!(accuracy.score, 0.0);
    assert!(!accuracy.success);
    assert!(accuracy.is_unparseable());
    assert_eq!(cell.error_kind(), Some(ErrorKind::ParseFailure));
    assert!(cell.usage.is_some());
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn test_scalar_and_null_replies_are_parse_failures() {
    for reply in ["null", r#""I could not find a title""#, "42"] {
        let mock = Arc::new(ScriptedProvider::new("mock").with_script(vec![Step::Reply(reply.to_string())]));
        let orchestrator = Orchestrator::new(registry(&[("mock", mock)]), config_for(&["mock"], 1));
        let mut ledger = UsageLedger::new();

        let results = orchestrator
            .run(&[job_case("a")], RunPhase::Standard, &mut ledger)
            .await;

        let cell = cell(&results, "a", "mock");
        let accuracy = cell.accuracy.as_ref().unwrap();
        assert_eq!(accuracy.score, 0.0, "reply {}", reply);
        assert!(accuracy.is_unparseable(), "reply {}", reply);
        assert_eq!(cell.error_kind(), Some(ErrorKind::ParseFailure), "reply {}", reply);

        let aggregated = extraction_bench::analysis::ComparisonEngine::new().aggregate(&results);
        assert_eq!(aggregated.failures_by_kind[&ErrorKind::ParseFailure], 1);
    }
}

#[tokio::test]
async fn test_panicking_progress_callback_does_not_abort_run() {
    let mock = Arc::new(ScriptedProvider::new("mock").with_responder(|_| JOB_REPLY.to_string()));
    let orchestrator = Orchestrator::new(registry(&[("mock", mock)]), config_for(&["mock"], 2))
        .with_progress(Arc::new(|_: &TestId, _: &str, _: f64| panic!("progress sink exploded")));
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a"), job_case("b")], RunPhase::Standard, &mut ledger)
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(orchestrator.state(), RunState::Done);
}

#[tokio::test]
async fn test_progress_reaches_one() {
    let mock = Arc::new(ScriptedProvider::new("mock").with_responder(|_| JOB_REPLY.to_string()));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let orchestrator = Orchestrator::new(registry(&[("mock", mock)]), config_for(&["mock"], 2))
        .with_progress(Arc::new(move |id: &TestId, provider: &str, fraction: f64| {
            sink.lock().unwrap().push((id.clone(), provider.to_string(), fraction));
        }));
    let mut ledger = UsageLedger::new();

    orchestrator
        .run(&[job_case("a"), job_case("b")], RunPhase::Standard, &mut ledger)
        .await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, "mock");
    assert_eq!(seen[1].2, 1.0);
}

#[tokio::test]
async fn test_stop_before_run_dispatches_nothing() {
    let mock = Arc::new(ScriptedProvider::new("mock").with_responder(|_| JOB_REPLY.to_string()));
    let stop = StopSignal::new();
    stop.stop();
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 2))
        .with_stop_signal(stop);
    let mut ledger = UsageLedger::new();

    let results = orchestrator
        .run(&[job_case("a"), job_case("b")], RunPhase::Standard, &mut ledger)
        .await;

    assert!(results.is_empty());
    assert!(ledger.is_empty());
    assert_eq!(mock.calls(), 0);
    assert_eq!(orchestrator.state(), RunState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_run_keeps_finished_cells() {
    let mock = Arc::new(
        ScriptedProvider::new("mock")
            .with_responder(|_| JOB_REPLY.to_string())
            .with_latency(Duration::from_millis(50)),
    );
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 1));
    let stop = orchestrator.stop_signal();
    let orchestrator = orchestrator.with_progress(Arc::new(move |_: &TestId, _: &str, _: f64| stop.stop()));
    let mut ledger = UsageLedger::new();

    let tests: Vec<TestCase> = ["a", "b", "c", "d"].into_iter().map(job_case).collect();
    let results = orchestrator.run(&tests, RunPhase::Standard, &mut ledger).await;

    assert!(!results.is_empty());
    assert!(results.len() < tests.len());
    assert_eq!(ledger.len(), results.len());
    for cells in results.values() {
        for cell in cells.values() {
            assert_eq!(cell.score(), Some(100.0));
        }
    }
}

fn keyed_responder(request: &extraction_bench::providers::CompletionRequest) -> String {
    let prompt = prompt_of(request);
    if prompt.contains("Oslo") {
        JOB_REPLY.to_string()
    } else if prompt.contains("Bergen") {
        r#"{"title": "Go Engineer", "city": "Oslo"}"#.to_string()
    } else {
        "no idea".to_string()
    }
}

fn mixed_cases() -> Vec<TestCase> {
    vec![
        job_case("a"),
        TestCase::new(
            TestId::new("jobs", "b"),
            "Go Engineer wanted in Bergen.",
            "Extract the job title and city.",
            json!({"title": "Go Engineer", "city": "Bergen"}),
        ),
        TestCase::new(
            TestId::new("jobs", "c"),
            "Nothing relevant here.",
            "Extract the job title and city.",
            json!({"title": "Chef", "city": "Trondheim"}),
        ),
    ]
}

async fn run_with_parallelism(parallel: usize) -> (ResultsMap, UsageLedger) {
    let alpha = Arc::new(
        ScriptedProvider::new("alpha")
            .with_responder(keyed_responder)
            .with_latency(Duration::from_millis(20)),
    );
    let beta = Arc::new(
        ScriptedProvider::new("beta")
            .with_responder(keyed_responder)
            .with_latency(Duration::from_millis(35)),
    );
    let orchestrator = Orchestrator::new(
        registry(&[("alpha", alpha.clone()), ("beta", beta.clone())]),
        config_for(&["alpha", "beta"], parallel),
    );
    let mut ledger = UsageLedger::new();
    let results = orchestrator
        .run(&mixed_cases(), RunPhase::Standard, &mut ledger)
        .await;
    (results, ledger)
}

#[tokio::test(start_paused = true)]
async fn test_parallel_and_sequential_runs_agree() {
    let (sequential, seq_ledger) = run_with_parallelism(1).await;
    let (parallel, par_ledger) = run_with_parallelism(4).await;

    assert_eq!(scores(&sequential), scores(&parallel));
    assert_eq!(seq_ledger.len(), par_ledger.len());
    assert_eq!(
        seq_ledger.summarize().total.total_tokens,
        par_ledger.summarize().total.total_tokens
    );

    let s = scores(&sequential);
    assert_eq!(s[&(TestId::new("jobs", "a"), CellKey::new("alpha", "alpha-model"))], Some(100.0));
    assert_eq!(s[&(TestId::new("jobs", "b"), CellKey::new("beta", "beta-model"))], Some(50.0));
    assert_eq!(s[&(TestId::new("jobs", "c"), CellKey::new("alpha", "alpha-model"))], Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let mock = Arc::new(
        ScriptedProvider::new("mock")
            .with_responder(|_| JOB_REPLY.to_string())
            .with_latency(Duration::from_millis(25)),
    );
    let orchestrator = Orchestrator::new(registry(&[("mock", mock.clone())]), config_for(&["mock"], 2));
    let mut ledger = UsageLedger::new();

    let tests: Vec<TestCase> = ["a", "b", "c", "d", "e", "f"].into_iter().map(job_case).collect();
    let results = orchestrator.run(&tests, RunPhase::Standard, &mut ledger).await;

    assert_eq!(results.len(), 6);
    assert_eq!(mock.peak_in_flight(), 2);
}

#[tokio::test]
async fn test_ledger_records_every_successful_call() {
    let alpha = Arc::new(ScriptedProvider::new("alpha").with_responder(keyed_responder));
    let beta = Arc::new(ScriptedProvider::new("beta").with_responder(keyed_responder));
    let orchestrator = Orchestrator::new(
        registry(&[("alpha", alpha), ("beta", beta)]),
        config_for(&["alpha", "beta"], 3),
    );
    let mut ledger = UsageLedger::new();

    orchestrator
        .run(&mixed_cases(), RunPhase::Standard, &mut ledger)
        .await;

    let summary = ledger.summarize();
    assert_eq!(ledger.len(), 6);
    assert_eq!(summary.total.total_tokens, 6 * 120);
    assert_eq!(summary.by_provider["alpha"].calls, 3);
    assert!((summary.total.total_cost - 6.0 * (100.0 * 1e-6 + 20.0 * 2e-6)).abs() < 1e-12);
    assert_eq!(summary.by_phase[&RunPhase::Standard].calls, 6);
}

#[tokio::test]
async fn test_run_directory_skips_incomplete_cases() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_case(
        root,
        "jobs",
        "a",
        "We are hiring a Rust Engineer in Oslo.",
        "Extract the job title and city.",
        r#"{"title": "Rust Engineer", "city": "Oslo"}"#,
    );
    write_case(
        root,
        "jobs",
        "b",
        "Go Engineer wanted in Bergen.",
        "Extract the job title and city.",
        r#"{"title": "Go Engineer", "city": "Bergen"}"#,
    );
    std::fs::write(root.join("jobs/sources/broken.txt"), "orphan source").unwrap();

    let mock = Arc::new(ScriptedProvider::new("mock").with_responder(keyed_responder));
    let orchestrator = Orchestrator::new(registry(&[("mock", mock)]), config_for(&["mock"], 2));
    let mut ledger = UsageLedger::new();

    let run = orchestrator.run_directory(root, None, &mut ledger).await.unwrap();

    assert_eq!(run.tests.len(), 2);
    assert_eq!(run.results.len(), 2);
    assert_eq!(run.skipped.len(), 1);
    assert_eq!(run.skipped[0].kind(), ErrorKind::MissingArtifact);
    assert_eq!(run.skipped[0].test_id(), Some(&TestId::new("jobs", "broken")));
    assert_eq!(cell(&run.results, "a", "mock").score(), Some(100.0));
    assert_eq!(cell(&run.results, "b", "mock").score(), Some(50.0));
}
