//! Shared fixtures: a scripted in-memory provider and a small config

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use extraction_bench::config::Config;
use extraction_bench::providers::{
    CompletionRequest, CompletionResponse, LLMProvider, ProviderError, ProviderRegistry,
    ProviderResult,
};

/// One scripted reaction to a call
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    /// Never answers; the gateway timeout ends the call
    Hang,
    Unavailable,
    Unsupported,
    ServerError,
}

type Responder = Box<dyn Fn(&CompletionRequest) -> String + Send + Sync>;

/// In-memory provider that plays back a script, then falls back to a responder
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Step>>,
    responder: Responder,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            responder: Box::new(|_| "{}".to_string()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_script(self, steps: Vec<Step>) -> Self {
        *self.script.lock().unwrap() = steps.into();
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> String + Send + Sync + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        let step = self.script.lock().unwrap().pop_front();
        let content = match step {
            Some(Step::Reply(text)) => text,
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Step::Unavailable) => {
                return Err(ProviderError::Unavailable("no API key".into()))
            }
            Some(Step::Unsupported) => {
                return Err(ProviderError::UnsupportedInput("images not accepted".into()))
            }
            Some(Step::ServerError) => {
                return Err(ProviderError::Api {
                    status: 503,
                    message: "overloaded".into(),
                })
            }
            None => (self.responder)(request),
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        Ok(CompletionResponse {
            content,
            model: request.model.clone(),
            input_tokens: 100,
            output_tokens: 20,
            finish_reason: "stop".into(),
            latency_ms: self.latency.as_millis() as u64,
        })
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.answer(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// User message of a request
pub fn prompt_of(request: &CompletionRequest) -> &str {
    request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Config with one model per named provider and fast retries
pub fn config_for(providers: &[&str], parallel: usize) -> Config {
    let mut toml = format!(
        r#"
[benchmark]
parallel_requests = {parallel}
timeout_ms = 1000

[benchmark.retry]
max_retries = 2
initial_delay_ms = 10
backoff_factor = 2.0
max_delay_ms = 100

[benchmark.optimizer]
threshold = 70.0
"#
    );
    for name in providers {
        toml.push_str(&format!(
            r#"
[providers.{name}]
api_key_env = "UNUSED_KEY"

[[providers.{name}.models]]
id = "{name}-model"
default = true
cost_per_input_token = 0.000001
cost_per_output_token = 0.000002
"#
        ));
    }
    Config::from_toml(&toml).unwrap()
}

pub fn registry(providers: &[(&str, Arc<ScriptedProvider>)]) -> ProviderRegistry {
    providers
        .iter()
        .map(|(id, p)| (id.to_string(), Arc::clone(p) as Arc<dyn LLMProvider>))
        .collect()
}

/// Write one test case into a registry tree
pub fn write_case(root: &Path, module: &str, name: &str, source: &str, prompt: &str, expected: &str) {
    for (dir, ext, body) in [
        ("sources", "txt", source),
        ("prompts", "txt", prompt),
        ("expected", "json", expected),
    ] {
        let dir = root.join(module).join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.{}", name, ext)), body).unwrap();
    }
}
