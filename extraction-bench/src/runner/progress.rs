//! Progress reporting for orchestrator runs

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::tasks::TestId;

/// Progress callback invoked after every finished cell
pub trait ProgressCallback: Send + Sync {
    /// `fraction` is the share of planned cells finished so far, in `0.0..=1.0`
    fn on_cell(&self, test_id: &TestId, provider_id: &str, fraction: f64);
}

impl<F> ProgressCallback for F
where
    F: Fn(&TestId, &str, f64) + Send + Sync,
{
    fn on_cell(&self, test_id: &TestId, provider_id: &str, fraction: f64) {
        self(test_id, provider_id, fraction)
    }
}

/// Default no-op progress callback
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_cell(&self, _test_id: &TestId, _provider_id: &str, _fraction: f64) {}
}

/// Console progress callback
pub struct ConsoleProgress;

impl ProgressCallback for ConsoleProgress {
    fn on_cell(&self, test_id: &TestId, provider_id: &str, fraction: f64) {
        println!("  [{:>3.0}%] {} on {}", fraction * 100.0, test_id, provider_id);
    }
}

/// Invoke `callback`, logging instead of propagating a panic
pub(crate) fn notify(callback: &dyn ProgressCallback, test_id: &TestId, provider_id: &str, fraction: f64) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        callback.on_cell(test_id, provider_id, fraction)
    }));
    if outcome.is_err() {
        tracing::warn!(
            "Progress callback panicked for {} on {}; continuing",
            test_id,
            provider_id
        );
    }
}
