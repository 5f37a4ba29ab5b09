//! In-memory emitter — useful for testing and dry runs.

use calltrace_core::{TelemetryEmitter, TelemetryError, TelemetryRecord};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Outcome {
    Accept(Option<String>),
    Fail,
}

/// An emitter that keeps every submitted record in a Vec.
pub struct InMemoryEmitter {
    records: Mutex<Vec<TelemetryRecord>>,
    outcome: Outcome,
}

impl InMemoryEmitter {
    /// Accept every record, returning no correlation id.
    pub fn new() -> Self {
        Self::with_outcome(Outcome::Accept(None))
    }

    /// Accept every record, returning `id` each time.
    pub fn with_correlation_id(id: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Accept(Some(id.into())))
    }

    /// Record, then fail every submission with a transport error.
    pub fn failing() -> Self {
        Self::with_outcome(Outcome::Fail)
    }

    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            outcome,
        }
    }

    /// Number of submissions, failed ones included.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<TelemetryRecord> {
        self.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryEmitter for InMemoryEmitter {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn submit(&self, record: TelemetryRecord) -> Result<Option<String>, TelemetryError> {
        self.lock().push(record);
        match &self.outcome {
            Outcome::Accept(id) => Ok(id.clone()),
            Outcome::Fail => Err(TelemetryError::Transport("in-memory emitter set to fail".into())),
        }
    }
}
