//! Benchmark execution engine

pub mod orchestrator;
pub mod progress;
pub mod rate_limiter;
pub mod retry;

pub use orchestrator::{
    CellKey, CellResult, DirectoryRun, Orchestrator, ResultsMap, RunState, StopSignal,
};
pub use progress::{ConsoleProgress, NoOpProgress, ProgressCallback};
pub use rate_limiter::RateLimiter;
pub use retry::with_retry;
