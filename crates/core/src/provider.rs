//! Provider kinds and their streaming conventions.
//!
//! Each backend streams chunks in its own shape and signals the end of a
//! logical response its own way. Only the conventions of known kinds are
//! evaluated; an unknown kind never terminates a stream on its own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Finish reasons that end an OpenAI-style chunk stream.
const OPENAI_TERMINAL_REASONS: &[&str] = &["stop", "length"];

/// The backend a wrapped client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderKind {
    /// OpenAI and OpenAI-compatible chat completion APIs.
    OpenAi,
    /// Any other backend, identified by name.
    Other(String),
}

impl ProviderKind {
    /// The tag transmitted with every telemetry record.
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::Other(name) => name,
        }
    }

    /// Whether `chunk` is the last chunk of a logical response.
    ///
    /// OpenAI chunks terminate on `choices[0].finish_reason` being `stop`
    /// or `length`. Other kinds have no terminal predicate.
    pub fn is_terminal(&self, chunk: &Value) -> bool {
        match self {
            Self::OpenAi => chunk
                .pointer("/choices/0/finish_reason")
                .and_then(Value::as_str)
                .is_some_and(|reason| OPENAI_TERMINAL_REASONS.contains(&reason)),
            Self::Other(_) => false,
        }
    }
}

impl From<&str> for ProviderKind {
    fn from(value: &str) -> Self {
        match value {
            "openai" => Self::OpenAi,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ProviderKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ProviderKind> for String {
    fn from(value: ProviderKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
