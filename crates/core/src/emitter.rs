//! TelemetryEmitter trait — the narrow interface to analytics sinks.
//!
//! The proxy hands every finished call to an emitter exactly once. Emitters
//! are blocking: the suspending call paths offload them onto a blocking
//! thread so they never stall the caller's executor.
//!
//! Implementations live in `calltrace-telemetry`.

use crate::error::TelemetryError;
use crate::provider::ProviderKind;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;

/// One finished call, ready for transmission.
#[derive(Clone)]
pub struct TelemetryRecord {
    /// Dotted path of the invoked member.
    pub function_name: String,
    /// Provider tag.
    pub provider_type: ProviderKind,
    /// Positional arguments (plain view).
    pub args: Vec<Value>,
    /// Keyword arguments that are plain structured values.
    pub kwargs: Map<String, Value>,
    /// Caller-supplied tags.
    pub tags: Option<Vec<String>>,
    /// The request as sent to the provider. Only the log store records it.
    pub request: Option<Value>,
    /// The response, or the reconciled response for streamed calls.
    pub response: Value,
    pub request_start_time: DateTime<Utc>,
    pub request_end_time: DateTime<Utc>,
    /// Analytics API key.
    pub api_key: String,
    /// Whether the caller asked for the correlation id.
    pub return_correlation_id: bool,
    /// Free-form metadata attached to every record of a proxy.
    pub metadata: Option<Map<String, Value>>,
}

impl fmt::Debug for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryRecord")
            .field("function_name", &self.function_name)
            .field("provider_type", &self.provider_type)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("tags", &self.tags)
            .field("response", &self.response)
            .field("request_start_time", &self.request_start_time)
            .field("request_end_time", &self.request_end_time)
            .field("api_key", &"[REDACTED]")
            .field("return_correlation_id", &self.return_correlation_id)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Ships finished calls to analytics sinks.
///
/// Returns the correlation id assigned by the sink, if any. Errors are
/// reported to the caller of `submit`, which is always the proxy's emission
/// boundary; they never reach the code that invoked the wrapped client.
pub trait TelemetryEmitter: Send + Sync {
    /// A short name for logs (e.g. "analytics", "in_memory").
    fn name(&self) -> &str;

    /// Submit one record. Blocking.
    fn submit(&self, record: TelemetryRecord) -> Result<Option<String>, TelemetryError>;
}
