//! Configuration management for the extraction benchmark
//!
//! Loads the provider/model catalog and run settings from TOML files and
//! provides read-only access at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::ledger::TokenPricing;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute
    #[serde(default = "default_tpm")]
    pub tpm: u32,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// Model-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// USD per prompt token
    #[serde(default)]
    pub cost_per_input_token: f64,
    /// USD per completion token
    #[serde(default)]
    pub cost_per_output_token: f64,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub default: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub supports_file_upload: bool,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            max_input_tokens: default_max_input_tokens(),
            max_output_tokens: default_max_output_tokens(),
            default: false,
            enabled: true,
            supports_file_upload: false,
        }
    }

    pub fn pricing(&self) -> TokenPricing {
        TokenPricing::new(self.cost_per_input_token, self.cost_per_output_token)
    }

    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Benchmark execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Upper bound on concurrently running cells
    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,
    /// Per-call timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Run every enabled model instead of only each provider's default
    #[serde(default)]
    pub all_models: bool,
    /// Relative tolerance for numeric comparison, 0.0 = exact
    #[serde(default)]
    pub numeric_tolerance: f64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Bounded retry for transient provider faults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based), capped at `max_delay_ms`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1) as i32;
        let ms = self.initial_delay_ms as f64 * self.backoff_factor.max(1.0).powi(exp);
        Duration::from_millis((ms as u64).min(self.max_delay_ms))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Prompt optimization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Tests whose best score is below this are re-prompted
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_rpm() -> u32 { 60 }
fn default_tpm() -> u32 { 100_000 }
fn default_max_input_tokens() -> u32 { 128_000 }
fn default_max_output_tokens() -> u32 { 4096 }
fn default_parallel_requests() -> usize { 4 }
fn default_timeout_ms() -> u64 { 120_000 }
fn default_max_retries() -> u32 { 2 }
fn default_initial_delay_ms() -> u64 { 500 }
fn default_backoff_factor() -> f64 { 2.0 }
fn default_max_delay_ms() -> u64 { 10_000 }
fn default_threshold() -> f64 { 70.0 }
fn default_system_prompt() -> String {
    "You are a precise data extraction engine. Read the source text and reply \
     with JSON only, following the requested schema exactly. Use null for \
     values that are not present in the source."
        .to_string()
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            parallel_requests: default_parallel_requests(),
            timeout_ms: default_timeout_ms(),
            all_models: false,
            numeric_tolerance: 0.0,
            system_prompt: default_system_prompt(),
            retry: RetryConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl BenchmarkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default config location or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = [
            "config/models.toml",
            "../config/models.toml",
            "extraction-bench/config/models.toml",
        ];

        for path in &config_paths {
            if !Path::new(path).exists() {
                continue;
            }
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(e) => tracing::warn!("Ignoring {}: {}", path, e),
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Enabled providers in id order
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&str, &ProviderConfig)> {
        self.providers
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(id, p)| (id.as_str(), p))
    }

    /// Get a specific provider config
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.benchmark.parallel_requests == 0 {
            return Err(ConfigError::Invalid(
                "benchmark.parallel_requests must be at least 1".to_string(),
            ));
        }
        if self.benchmark.numeric_tolerance < 0.0 {
            return Err(ConfigError::Invalid(
                "benchmark.numeric_tolerance must not be negative".to_string(),
            ));
        }
        for (id, provider) in &self.providers {
            let defaults = provider.models.iter().filter(|m| m.default).count();
            if defaults > 1 {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' marks {} models as default",
                    id, defaults
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = BTreeMap::new();

        providers.insert("anthropic".to_string(), ProviderConfig {
            enabled: true,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            rpm: 1_000,
            tpm: 450_000,
            models: vec![
                ModelConfig {
                    display_name: "Claude Sonnet 4.5".to_string(),
                    cost_per_input_token: 3.0e-6,
                    cost_per_output_token: 15.0e-6,
                    max_input_tokens: 200_000,
                    max_output_tokens: 8192,
                    default: true,
                    supports_file_upload: true,
                    ..ModelConfig::new("claude-sonnet-4-5-20250929")
                },
                ModelConfig {
                    display_name: "Claude Haiku 4.5".to_string(),
                    cost_per_input_token: 1.0e-6,
                    cost_per_output_token: 5.0e-6,
                    max_input_tokens: 200_000,
                    max_output_tokens: 8192,
                    supports_file_upload: true,
                    ..ModelConfig::new("claude-haiku-4-5-20251001")
                },
            ],
        });

        providers.insert("openai".to_string(), ProviderConfig {
            enabled: true,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            rpm: 500,
            tpm: 200_000,
            models: vec![
                ModelConfig {
                    display_name: "GPT-4o".to_string(),
                    cost_per_input_token: 2.5e-6,
                    cost_per_output_token: 10.0e-6,
                    max_input_tokens: 128_000,
                    max_output_tokens: 16_384,
                    default: true,
                    supports_file_upload: true,
                    ..ModelConfig::new("gpt-4o")
                },
                ModelConfig {
                    display_name: "GPT-4o mini".to_string(),
                    cost_per_input_token: 0.15e-6,
                    cost_per_output_token: 0.6e-6,
                    max_input_tokens: 128_000,
                    max_output_tokens: 16_384,
                    ..ModelConfig::new("gpt-4o-mini")
                },
            ],
        });

        Self {
            benchmark: BenchmarkConfig::default(),
            providers,
        }
    }
}

impl ProviderConfig {
    /// Get model config by ID
    pub fn get_model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// The model flagged `default`, else the first enabled one
    pub fn default_model(&self) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.default && m.enabled)
            .or_else(|| self.models.iter().find(|m| m.enabled))
    }

    /// Models a run should exercise for this provider
    pub fn models_to_run(&self, all_models: bool) -> Vec<&ModelConfig> {
        if all_models {
            self.models.iter().filter(|m| m.enabled).collect()
        } else {
            self.default_model().into_iter().collect()
        }
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
