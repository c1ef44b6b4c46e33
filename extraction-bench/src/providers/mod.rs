//! LLM Provider implementations

pub mod anthropic;
pub mod extract;
pub mod gateway;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use extract::{extract_json, strip_code_fences};
pub use gateway::{dispatch, DispatchRequest, ProviderCallResult};
pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::HeaderMap;

use crate::config::{Config, ProviderConfig};

/// Provider id -> backend instance
pub type ProviderRegistry = BTreeMap<String, Arc<dyn LLMProvider>>;

/// Rough prompt size: four characters per token
pub fn estimate_tokens(request: &CompletionRequest) -> u32 {
    let chars: usize = request
        .messages
        .iter()
        .map(|m| m.content.chars().count())
        .sum::<usize>()
        + request
            .system_prompt
            .as_deref()
            .map(|s| s.chars().count())
            .unwrap_or(0);
    chars.div_ceil(4).min(u32::MAX as usize) as u32
}

/// `retry-after` header in milliseconds, 60s when absent
pub(crate) fn retry_after_ms(headers: &HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60)
        * 1000
}

fn build_anthropic(pc: &ProviderConfig) -> AnthropicClient {
    let mut client = AnthropicClient::new(pc.api_key()).with_rate_limits(pc.rpm, pc.tpm);
    if let Some(url) = &pc.base_url {
        client = client.with_base_url(url);
    }
    client
}

fn build_openai(pc: &ProviderConfig) -> OpenAIClient {
    let mut client = OpenAIClient::new(pc.api_key()).with_rate_limits(pc.rpm, pc.tpm);
    if let Some(url) = &pc.base_url {
        client = client.with_base_url(url);
    }
    client
}

/// Create a backend for every enabled provider in `config`.
///
/// Providers without credentials are still registered: their calls fail
/// with [`ProviderError::Unavailable`] so the gap shows up in the results.
pub fn create_providers_with_config(config: &Config) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();

    for (id, pc) in config.enabled_providers() {
        let provider: Arc<dyn LLMProvider> = match id {
            "anthropic" => Arc::new(build_anthropic(pc)),
            "openai" => Arc::new(build_openai(pc)),
            other => {
                tracing::warn!("No backend for provider '{}', skipping", other);
                continue;
            }
        };
        if pc.api_key().is_none() {
            tracing::warn!("{} is not set; {} cells will be unavailable", pc.api_key_env, id);
        }
        providers.insert(id.to_string(), provider);
    }

    providers
}

/// Restrict a registry to the named providers (case-insensitive)
pub fn select_providers(registry: ProviderRegistry, names: &[String]) -> ProviderRegistry {
    if names.is_empty() {
        return registry;
    }
    registry
        .into_iter()
        .filter(|(id, _)| names.iter().any(|n| n.eq_ignore_ascii_case(id)))
        .collect()
}
