//! Extraction accuracy benchmark CLI

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use extraction_bench::{
    analysis::ComparisonEngine,
    config::Config,
    ledger::UsageLedger,
    optimizer::PromptOptimizer,
    providers::{create_providers_with_config, select_providers},
    reporting::{print_console_report, RunReport, SkippedTest},
    runner::{ConsoleProgress, Orchestrator, StopSignal},
    tasks::TestRegistry,
};

#[derive(Parser)]
#[command(name = "extraction-bench")]
#[command(about = "Structured-extraction accuracy benchmark across LLM providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every discovered test against the enabled providers
    Run {
        /// Test registry root
        #[arg(short, long, default_value = "tests-data")]
        root: PathBuf,

        /// Comma-separated modules to run (default: all)
        #[arg(short, long)]
        modules: Option<String>,

        /// Comma-separated provider list (default: all configured)
        #[arg(short, long)]
        providers: Option<String>,

        /// Run every enabled model instead of each provider's default
        #[arg(long)]
        all_models: bool,

        /// Override the number of parallel requests
        #[arg(long)]
        parallel: Option<usize>,

        /// Re-prompt tests whose best score falls below the threshold
        #[arg(long)]
        optimize: bool,

        /// Optimization threshold (0-100), overrides the config value
        #[arg(long)]
        threshold: Option<f64>,

        /// Write a JSON report to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List discovered test cases
    ListTests {
        /// Test registry root
        #[arg(short, long, default_value = "tests-data")]
        root: PathBuf,

        /// Comma-separated modules to list (default: all)
        #[arg(short, long)]
        modules: Option<String>,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/models.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("extraction_bench=debug,info")
    } else {
        EnvFilter::new("extraction_bench=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Run {
            root,
            modules,
            providers,
            all_models,
            parallel,
            optimize,
            threshold,
            output,
        } => {
            let options = RunOptions {
                root,
                modules: split_list(modules),
                providers: split_list(providers),
                all_models,
                parallel,
                optimize,
                threshold,
                output,
            };
            run_benchmark(config, options).await?;
        }

        Commands::ListTests { root, modules } => {
            list_tests(root, split_list(modules))?;
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }
    }

    Ok(())
}

struct RunOptions {
    root: PathBuf,
    modules: Option<Vec<String>>,
    providers: Option<Vec<String>>,
    all_models: bool,
    parallel: Option<usize>,
    optimize: bool,
    threshold: Option<f64>,
    output: Option<PathBuf>,
}

fn split_list(arg: Option<String>) -> Option<Vec<String>> {
    arg.map(|s| {
        s.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
}

async fn run_benchmark(
    mut config: Config,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let run_id = Utc::now().format("%Y%m%d-%H%M%S").to_string();

    println!("=== Extraction Accuracy Benchmark ===");
    println!("Run ID: {}", run_id);
    println!("Root:   {}", options.root.display());
    println!();

    if options.all_models {
        config.benchmark.all_models = true;
    }
    if let Some(parallel) = options.parallel {
        config.benchmark.parallel_requests = parallel.max(1);
    }
    if let Some(threshold) = options.threshold {
        config.benchmark.optimizer.threshold = threshold;
    }

    let mut registry = create_providers_with_config(&config);
    if let Some(names) = &options.providers {
        registry = select_providers(registry, names);
    }

    if registry.is_empty() {
        eprintln!("Error: No providers configured.");
        eprintln!("  ANTHROPIC_API_KEY for Anthropic/Claude");
        eprintln!("  OPENAI_API_KEY for OpenAI");
        std::process::exit(1);
    }

    let provider_names: Vec<&str> = registry.keys().map(String::as_str).collect();
    println!("Providers: {}", provider_names.join(", "));

    let stop = StopSignal::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight requests");
            ctrl_c_stop.stop();
        }
    });

    let threshold = config.benchmark.optimizer.threshold;
    let orchestrator = Orchestrator::new(registry, config)
        .with_progress(Arc::new(ConsoleProgress))
        .with_stop_signal(stop.clone());

    let mut ledger = UsageLedger::new();
    println!("Running benchmark...");
    let run = orchestrator
        .run_directory(&options.root, options.modules.as_deref(), &mut ledger)
        .await?;

    if run.tests.is_empty() {
        eprintln!("Error: No tests to run");
        std::process::exit(1);
    }

    let optimized = if options.optimize && !stop.is_stopped() {
        println!("\nOptimizing prompts below {:.1}...", threshold);
        PromptOptimizer::new(threshold)
            .optimize(&orchestrator, &run.results, &run.tests, &mut ledger)
            .await
    } else {
        BTreeMap::new()
    };

    let engine = ComparisonEngine::new();
    let comparisons = engine.compare_all(&run.results);
    let aggregated = engine.aggregate(&run.results);
    let usage = ledger.summarize();

    print_console_report(&aggregated, &usage, &optimized);

    if let Some(path) = options.output {
        let skipped = run
            .skipped
            .iter()
            .map(|e| SkippedTest {
                test: e.test_id().map(|id| id.to_string()),
                kind: e.kind().to_string(),
                message: e.to_string(),
            })
            .collect();
        RunReport::new(
            run_id.as_str(),
            &aggregated,
            &comparisons,
            &run.results,
            &optimized,
            &usage,
        )
        .with_skipped(skipped)
        .write_to_file(&path)?;
        println!("Report written to: {}", path.display());
    }

    Ok(())
}

fn list_tests(
    root: PathBuf,
    modules: Option<Vec<String>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tests, skipped) = TestRegistry::new(root)
        .discover(modules.as_deref())?
        .collect_logged();

    println!("Available Tests ({}):", tests.len());
    println!("{:-<60}", "");

    for test in &tests {
        let files = if test.has_files() {
            format!(" | {} file(s)", test.files.len())
        } else {
            String::new()
        };
        println!("  {}{}", test.id, files);
    }

    if !skipped.is_empty() {
        println!("\nSkipped ({}):", skipped.len());
        for error in &skipped {
            println!("  {}", error);
        }
    }

    Ok(())
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save_toml(&output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}
