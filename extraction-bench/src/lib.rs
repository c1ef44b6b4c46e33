//! Structured-extraction accuracy benchmark
//!
//! Measures how accurately LLM providers pull structured data out of
//! unstructured text. Each test case pairs a source text and a prompt with
//! the expected JSON value; every enabled provider/model is asked for a
//! reply, and the reply is scored field by field against the expectation.
//!
//! # Features
//!
//! - Test discovery from a `<module>/{sources,prompts,expected}` tree
//! - Anthropic and OpenAI backends behind one [`providers::LLMProvider`] trait
//! - Weighted recursive scoring with text, number and date normalization
//! - Bounded concurrency, retries with backoff, and a cooperative stop signal
//! - Per-call token/cost ledger
//! - One-shot prompt optimization for low-scoring tests
//!
//! # Example
//!
//! ```no_run
//! use extraction_bench::{
//!     analysis::ComparisonEngine,
//!     config::Config,
//!     ledger::UsageLedger,
//!     providers::create_providers_with_config,
//!     runner::Orchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default();
//!     let providers = create_providers_with_config(&config);
//!     let orchestrator = Orchestrator::new(providers, config);
//!
//!     let mut ledger = UsageLedger::new();
//!     let run = orchestrator
//!         .run_directory(std::path::Path::new("tests-data"), None, &mut ledger)
//!         .await?;
//!
//!     let aggregated = ComparisonEngine::new().aggregate(&run.results);
//!     println!("{} tests, ${:.4}", aggregated.total_tests, ledger.summarize().total.total_cost);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod ledger;
pub mod normalize;
pub mod optimizer;
pub mod providers;
pub mod reporting;
pub mod runner;
pub mod schema;
pub mod tasks;

pub use config::Config;
pub use error::{CellError, ErrorKind};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{
        score, AccuracyResult, AccuracyScorer, AggregatedResults, ComparisonEngine,
        ComparisonResult, FieldResult, FieldStatus,
    };
    pub use crate::config::{Config, ModelConfig, ProviderConfig};
    pub use crate::error::{CellError, ErrorKind};
    pub use crate::ledger::{RunPhase, UsageLedger, UsageMetrics, UsageSummary};
    pub use crate::optimizer::{optimize, OptimizedPromptRecord, PromptOptimizer};
    pub use crate::providers::{
        create_providers_with_config, CompletionRequest, CompletionResponse, LLMProvider,
        Message, ProviderError, ProviderRegistry, ProviderResult,
    };
    pub use crate::reporting::{print_console_report, RunReport};
    pub use crate::runner::{
        CellKey, CellResult, Orchestrator, ProgressCallback, ResultsMap, StopSignal,
    };
    pub use crate::schema::SchemaDescriptor;
    pub use crate::tasks::{TestCase, TestId, TestRegistry};
}
