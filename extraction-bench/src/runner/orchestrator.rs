//! Test orchestration: every test case against every enabled provider/model
//!
//! Cells (test × provider × model) run concurrently up to
//! `benchmark.parallel_requests`. Each cell is dispatched through the
//! provider gateway with bounded retries, scored, and written under its own
//! key, so the results do not depend on completion order. Failures stay in
//! their cell; only a missing registry root aborts a directory run.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use super::progress::{notify, ProgressCallback};
use super::retry::with_retry;
use crate::analysis::scorer::{AccuracyResult, AccuracyScorer};
use crate::config::{Config, ModelConfig, RetryConfig};
use crate::error::{CellError, ErrorKind};
use crate::ledger::{RunPhase, UsageLedger, UsageMetrics};
use crate::providers::{
    dispatch, DispatchRequest, LLMProvider, ProviderCallResult, ProviderError, ProviderRegistry,
    ProviderResult,
};
use crate::tasks::{LoadError, TestCase, TestId, TestRegistry};

/// Provider + model identity of a cell, serialized as `"provider/model"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub provider: String,
    pub model: String,
}

impl CellKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl Serialize for CellKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        // Model ids may themselves contain '/'
        match s.split_once('/') {
            Some((provider, model)) => Ok(Self::new(provider, model)),
            None => Err(serde::de::Error::custom(format!(
                "invalid cell key '{}', expected provider/model",
                s
            ))),
        }
    }
}

/// Outcome of one cell.
///
/// A cell whose call never succeeded has `error` set and neither
/// `accuracy` nor `usage`. A reply that could not be parsed has all three:
/// a zero score, the call's usage and a `parse_failure` error.
#[derive(Debug, Clone, Serialize)]
pub struct CellResult {
    pub accuracy: Option<AccuracyResult>,
    pub usage: Option<UsageMetrics>,
    pub error: Option<CellError>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

impl CellResult {
    fn failed(error: CellError, attempts: u32) -> Self {
        Self {
            accuracy: None,
            usage: None,
            error: Some(error),
            attempts,
            response_text: None,
        }
    }

    /// Score, if the cell produced one
    pub fn score(&self) -> Option<f64> {
        self.accuracy.as_ref().map(|a| a.score)
    }

    /// The call itself failed; nothing was scored
    pub fn is_failed(&self) -> bool {
        self.accuracy.is_none()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// test → provider/model → outcome
pub type ResultsMap = BTreeMap<TestId, BTreeMap<CellKey, CellResult>>;

/// Coarse phase of the current run, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Discovering,
    Dispatching,
    Scoring,
    Aggregating,
    Done,
}

/// Cooperative stop flag, checked before each cell starts
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of discovering and running a registry directory
#[derive(Debug)]
pub struct DirectoryRun {
    pub tests: Vec<TestCase>,
    pub results: ResultsMap,
    /// Test cases skipped during discovery
    pub skipped: Vec<LoadError>,
}

/// Settings shared by every cell of a run
struct CellSettings {
    retry: RetryConfig,
    timeout: Duration,
    system_prompt: String,
}

/// Providers known to be unusable in this run, with the first error seen
type UnavailableProviders = Arc<Mutex<HashMap<String, String>>>;

/// What a spawned cell hands back
struct CellOutcome {
    call: ProviderResult<ProviderCallResult>,
    attempts: u32,
}

struct PendingCell {
    test: Arc<TestCase>,
    key: CellKey,
    handle: JoinHandle<Option<CellOutcome>>,
}

/// Drives test cases through providers and scores the replies
pub struct Orchestrator {
    providers: ProviderRegistry,
    config: Config,
    progress: Option<Arc<dyn ProgressCallback>>,
    stop: StopSignal,
    state: watch::Sender<RunState>,
}

impl Orchestrator {
    /// Create an orchestrator over `providers`; models and pricing come from `config`
    pub fn new(providers: ProviderRegistry, config: Config) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            providers,
            config,
            progress: None,
            stop: StopSignal::new(),
            state,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that halts the run before the next cell starts
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Observe run state changes
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    fn set_state(&self, next: RunState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// (provider id, backend, model) triples a test runs against, in key order
    fn plan(&self) -> Vec<(String, Arc<dyn LLMProvider>, ModelConfig)> {
        let mut plan = Vec::new();
        for (id, provider) in &self.providers {
            let Some(pc) = self.config.get_provider(id) else {
                tracing::warn!("Provider '{}' has no configuration, skipping", id);
                continue;
            };
            if !pc.enabled {
                continue;
            }
            let models = pc.models_to_run(self.config.benchmark.all_models);
            if models.is_empty() {
                tracing::warn!("Provider '{}' has no enabled models, skipping", id);
            }
            for model in models {
                plan.push((id.clone(), Arc::clone(provider), model.clone()));
            }
        }
        plan
    }

    /// Discover test cases under `root` and run them all
    pub async fn run_directory(
        &self,
        root: &Path,
        module_filter: Option<&[String]>,
        ledger: &mut UsageLedger,
    ) -> Result<DirectoryRun, LoadError> {
        self.set_state(RunState::Discovering);
        let discovery = match TestRegistry::new(root).discover(module_filter) {
            Ok(discovery) => discovery,
            Err(e) => {
                self.set_state(RunState::Idle);
                return Err(e);
            }
        };
        let (tests, skipped) = discovery.collect_logged();
        tracing::info!("Discovered {} test cases ({} skipped)", tests.len(), skipped.len());

        let results = self.run(&tests, RunPhase::Standard, ledger).await;
        Ok(DirectoryRun {
            tests,
            results,
            skipped,
        })
    }

    /// Run every cell for `tests`, recording usage into `ledger` under `phase`
    pub async fn run(&self, tests: &[TestCase], phase: RunPhase, ledger: &mut UsageLedger) -> ResultsMap {
        let plan = self.plan();
        let total = tests.len() * plan.len();
        tracing::info!(
            "Running {} tests x {} provider/model pairs ({} cells, {} phase)",
            tests.len(),
            plan.len(),
            total,
            phase
        );

        self.set_state(RunState::Dispatching);

        let settings = Arc::new(CellSettings {
            retry: self.config.benchmark.retry.clone(),
            timeout: self.config.benchmark.timeout(),
            system_prompt: self.config.benchmark.system_prompt.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.benchmark.parallel_requests.max(1)));
        let unavailable: UnavailableProviders = Arc::default();

        let mut pending = Vec::with_capacity(total);
        for test in tests {
            let test = Arc::new(test.clone());
            for (provider_id, provider, model) in &plan {
                let key = CellKey::new(provider_id.as_str(), model.id.as_str());
                let handle = tokio::spawn(execute_cell(
                    provider_id.clone(),
                    Arc::clone(provider),
                    Arc::clone(&test),
                    model.clone(),
                    Arc::clone(&settings),
                    Arc::clone(&semaphore),
                    self.stop.clone(),
                    Arc::clone(&unavailable),
                ));
                pending.push(PendingCell {
                    test: Arc::clone(&test),
                    key,
                    handle,
                });
            }
        }

        let scorer = AccuracyScorer::new().with_numeric_tolerance(self.config.benchmark.numeric_tolerance);
        let mut results = ResultsMap::new();
        let mut finished = 0usize;

        for cell in pending {
            let outcome = match cell.handle.await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("Cell {} on {} panicked: {}", cell.test.id, cell.key, e);
                    CellOutcome {
                        call: Err(ProviderError::Parse(format!("cell task panicked: {}", e))),
                        attempts: 1,
                    }
                }
            };

            self.set_state(RunState::Scoring);
            let result = score_cell(&scorer, &cell.test, &cell.key, outcome);
            results
                .entry(cell.test.id.clone())
                .or_default()
                .insert(cell.key.clone(), result);

            finished += 1;
            if let Some(progress) = &self.progress {
                notify(
                    progress.as_ref(),
                    &cell.test.id,
                    &cell.key.provider,
                    finished as f64 / total.max(1) as f64,
                );
            }
            self.set_state(RunState::Dispatching);
        }

        if self.stop.is_stopped() {
            tracing::warn!("Run stopped early: {} of {} cells completed", finished, total);
        }

        self.set_state(RunState::Aggregating);
        for (test_id, cells) in &results {
            for (key, cell) in cells {
                if let Some(usage) = &cell.usage {
                    ledger.record(test_id, &key.provider, &key.model, phase, usage.clone());
                }
            }
        }

        self.set_state(RunState::Done);
        results
    }
}

/// One cell's network part: wait for a worker slot, then dispatch with retries.
/// Returns `None` when the run was stopped before the cell started.
async fn execute_cell(
    provider_id: String,
    provider: Arc<dyn LLMProvider>,
    test: Arc<TestCase>,
    model: ModelConfig,
    settings: Arc<CellSettings>,
    semaphore: Arc<Semaphore>,
    stop: StopSignal,
    unavailable: UnavailableProviders,
) -> Option<CellOutcome> {
    let _permit = semaphore.acquire_owned().await.ok()?;
    if stop.is_stopped() {
        return None;
    }

    let known_unavailable = unavailable
        .lock()
        .ok()
        .and_then(|map| map.get(&provider_id).cloned());
    if let Some(message) = known_unavailable {
        return Some(CellOutcome {
            call: Err(ProviderError::Unavailable(message)),
            attempts: 0,
        });
    }

    tracing::debug!("{} on {}/{}: dispatching", test.id, provider_id, model.id);
    let prompt = test.render_prompt();
    let request = DispatchRequest::new(&prompt, &model)
        .with_system(&settings.system_prompt)
        .with_schema(&test.schema)
        .with_files(&test.files);
    let label = format!("{} on {}/{}", test.id, provider_id, model.id);

    let provider_ref = provider.as_ref();
    let request_ref = &request;
    let timeout = settings.timeout;
    let (call, attempts) = with_retry(&settings.retry, &label, || async move {
        dispatch(provider_ref, request_ref, timeout).await
    })
    .await;

    if let Err(ProviderError::Unavailable(message)) = &call {
        if let Ok(mut map) = unavailable.lock() {
            map.entry(provider_id).or_insert_with(|| message.clone());
        }
    }

    Some(CellOutcome { call, attempts })
}

fn score_cell(scorer: &AccuracyScorer, test: &TestCase, key: &CellKey, outcome: CellOutcome) -> CellResult {
    let call = match outcome.call {
        Ok(call) => call,
        Err(e) => {
            tracing::debug!("{} on {}: failed ({})", test.id, key, e.kind());
            return CellResult::failed(CellError::from(&e), outcome.attempts);
        }
    };

    tracing::debug!("{} on {}: scoring", test.id, key);
    let (accuracy, error) = match &call.parsed {
        Some(value) => (scorer.score(&test.expected, Some(value), Some(&test.schema)), None),
        None => (
            AccuracyResult::unparseable(&test.expected),
            Some(CellError::new(
                ErrorKind::ParseFailure,
                call.parse_error.clone().unwrap_or_else(|| "response was not JSON".to_string()),
            )),
        ),
    };

    CellResult {
        accuracy: Some(accuracy),
        usage: Some(call.usage),
        error,
        attempts: outcome.attempts,
        response_text: Some(call.response_text),
    }
}
