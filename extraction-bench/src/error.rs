//! Error taxonomy shared by the registry, gateway and orchestrator

use serde::{Deserialize, Serialize};

/// Category an error belongs to, used to group failures in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A source, prompt or expected file is absent for one test case
    MissingArtifact,
    /// An artifact or module directory exists but cannot be read or parsed
    InvalidArtifact,
    /// The backend has no credentials or rejected them
    ProviderUnavailable,
    /// Transient network/backend fault (timeout, non-2xx, malformed reply)
    ProviderCallError,
    /// The cell asks for something the backend or model cannot take
    UnsupportedInput,
    /// The response text could not be recovered as structured data
    ParseFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingArtifact => "missing_artifact",
            ErrorKind::InvalidArtifact => "invalid_artifact",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ProviderCallError => "provider_call_error",
            ErrorKind::UnsupportedInput => "unsupported_input",
            ErrorKind::ParseFailure => "parse_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error recorded against a single cell of the results map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CellError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<&crate::providers::ProviderError> for CellError {
    fn from(err: &crate::providers::ProviderError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
