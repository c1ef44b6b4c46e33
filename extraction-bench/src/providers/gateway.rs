//! Uniform dispatch over provider backends
//!
//! Turns one (prompt, model, schema, files) request into a
//! [`ProviderCallResult`]: raw text, the recovered JSON value and the usage
//! of the call, whatever the backend.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::extract::extract_json;
use super::traits::{CompletionRequest, LLMProvider, Message, ProviderError, ProviderResult};
use super::estimate_tokens;
use crate::config::ModelConfig;
use crate::ledger::UsageMetrics;
use crate::schema::SchemaDescriptor;

/// Inputs for one provider call
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub prompt: &'a str,
    pub system_prompt: Option<&'a str>,
    pub model: &'a ModelConfig,
    pub schema: Option<&'a SchemaDescriptor>,
    pub files: &'a [PathBuf],
}

impl<'a> DispatchRequest<'a> {
    pub fn new(prompt: &'a str, model: &'a ModelConfig) -> Self {
        Self {
            prompt,
            system_prompt: None,
            model,
            schema: None,
            files: &[],
        }
    }

    pub fn with_system(mut self, system_prompt: &'a str) -> Self {
        self.system_prompt = Some(system_prompt);
        self
    }

    pub fn with_schema(mut self, schema: &'a SchemaDescriptor) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_files(mut self, files: &'a [PathBuf]) -> Self {
        self.files = files;
        self
    }
}

/// Outcome of a call that reached the backend and got an answer.
///
/// A reply that is not recoverable as JSON still produces a result:
/// `parsed` is `None` and `parse_error` says why.
#[derive(Debug, Clone)]
pub struct ProviderCallResult {
    pub response_text: String,
    pub parsed: Option<Value>,
    pub parse_error: Option<String>,
    pub usage: UsageMetrics,
}

impl ProviderCallResult {
    pub fn is_parsed(&self) -> bool {
        self.parsed.is_some()
    }
}

/// Send one request through `provider` and recover structured output
pub async fn dispatch(
    provider: &dyn LLMProvider,
    request: &DispatchRequest<'_>,
    timeout: Duration,
) -> ProviderResult<ProviderCallResult> {
    let model = request.model;

    if !request.files.is_empty()
        && !(model.supports_file_upload && provider.supports_files(&model.id))
    {
        return Err(ProviderError::UnsupportedInput(format!(
            "{}/{} cannot accept {} attached file(s)",
            provider.name(),
            model.id,
            request.files.len()
        )));
    }

    let mut completion = CompletionRequest::new(
        model.id.clone(),
        vec![Message::user(request.prompt)],
        model.max_output_tokens,
    )
    .with_temperature(0.0);
    if let Some(system) = request.system_prompt {
        completion = completion.with_system(system);
    }

    let estimated = estimate_tokens(&completion);
    if estimated > model.max_input_tokens {
        return Err(ProviderError::UnsupportedInput(format!(
            "prompt needs ~{} tokens, {} accepts at most {}",
            estimated, model.id, model.max_input_tokens
        )));
    }

    let start = Instant::now();
    let response = tokio::time::timeout(timeout, provider.complete(&completion))
        .await
        .map_err(|_| ProviderError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })??;
    let elapsed = start.elapsed();

    let usage = UsageMetrics::new(
        provider.name(),
        model.id.clone(),
        response.input_tokens as u64,
        response.output_tokens as u64,
        model.pricing(),
        elapsed,
    );

    let (parsed, parse_error) = match extract_json(&response.content) {
        Ok(value) => {
            let value = match request.schema {
                Some(schema) => schema.coerce(&value),
                None => value,
            };
            (Some(value), None)
        }
        Err(reason) => {
            tracing::debug!(
                "Unparseable response from {}/{}: {}",
                provider.name(),
                model.id,
                reason
            );
            (None, Some(reason))
        }
    };

    Ok(ProviderCallResult {
        response_text: response.content,
        parsed,
        parse_error,
        usage,
    })
}
