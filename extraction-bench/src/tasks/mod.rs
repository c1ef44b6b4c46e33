//! Test case definitions and discovery

pub mod loader;

pub use loader::{discover, Discovery, LoadError, TestRegistry};

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::SchemaDescriptor;

/// Identity of a test case: the module it lives in plus its base name.
///
/// Serializes as `"module/name"` so it can key JSON objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId {
    pub module: String,
    pub name: String,
}

impl TestId {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.module, self.name)
    }
}

impl std::str::FromStr for TestId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((module, name)) if !module.is_empty() && !name.is_empty() => {
                Ok(Self::new(module, name))
            }
            _ => Err(format!("invalid test id '{}', expected module/name", s)),
        }
    }
}

impl Serialize for TestId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TestId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One (source text, prompt, expected value) triple under a module
#[derive(Debug, Clone)]
pub struct TestCase {
    pub id: TestId,
    pub schema: Arc<SchemaDescriptor>,
    pub source_text: String,
    pub prompt_text: String,
    pub expected: Value,
    /// Attachments for multimodal input, empty for text-only cases
    pub files: Vec<PathBuf>,
}

impl TestCase {
    /// Create a text-only test case whose schema is inferred from `expected`
    pub fn new(
        id: TestId,
        source_text: impl Into<String>,
        prompt_text: impl Into<String>,
        expected: Value,
    ) -> Self {
        let schema = Arc::new(SchemaDescriptor::infer(&expected));
        Self {
            id,
            schema,
            source_text: source_text.into(),
            prompt_text: prompt_text.into(),
            expected,
            files: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    /// Copy of this case carrying a different prompt
    pub fn with_prompt(&self, prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            ..self.clone()
        }
    }

    /// Full user message: instructions, schema hint and the source text
    pub fn render_prompt(&self) -> String {
        format!(
            "{}\n\nRespond with a single JSON object matching this schema:\n{}\n\n--- SOURCE ---\n{}",
            self.prompt_text.trim_end(),
            self.schema.prompt_hint(),
            self.source_text
        )
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}
