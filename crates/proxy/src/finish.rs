//! The emission boundary.
//!
//! [`Telemetry`] turns a finished [`CallEnvelope`] into a record and hands it
//! to the emitter. Every failure on this path stops here: it is logged with
//! `warn!` and the caller sees no correlation id.
//!
//! Emitters are blocking and may not run on an async worker thread. Inside
//! a tokio runtime every emission happens on a thread of its own.

use calltrace_core::{CallEnvelope, TelemetryEmitter, TelemetryError};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

/// Emitter plus the credential and metadata stamped onto every record.
pub struct Telemetry {
    emitter: Arc<dyn TelemetryEmitter>,
    api_key: Option<String>,
    metadata: Option<Map<String, Value>>,
}

impl Telemetry {
    pub fn new(emitter: Arc<dyn TelemetryEmitter>, api_key: Option<String>) -> Self {
        Self {
            emitter,
            api_key: api_key.filter(|k| !k.is_empty()),
            metadata: None,
        }
    }

    /// Attach metadata sent with every record.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Submit one finished call, reporting failures.
    pub fn try_finish(
        &self,
        envelope: CallEnvelope,
        response: Value,
    ) -> Result<Option<String>, TelemetryError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            TelemetryError::MissingCredential(format!(
                "no analytics API key configured for `{}`",
                envelope.target_path
            ))
        })?;
        let record = envelope.into_record(response, api_key, self.metadata.clone());
        self.emitter.submit(record)
    }

    /// Submit one finished call and wait for it. Never fails.
    ///
    /// Inline without a runtime. Inside one, the emitter runs on a scoped
    /// thread; multi-thread workers hand their queue off first.
    pub fn finish(&self, envelope: CallEnvelope, response: Value) -> Option<String> {
        let Ok(handle) = Handle::try_current() else {
            return self.emit(envelope, response);
        };
        let off_runtime = || self.emit_on_scoped_thread(envelope, response);
        match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => tokio::task::block_in_place(off_runtime),
            _ => off_runtime(),
        }
    }

    fn emit_on_scoped_thread(&self, envelope: CallEnvelope, response: Value) -> Option<String> {
        let path = envelope.target_path.clone();
        std::thread::scope(|scope| scope.spawn(|| self.emit(envelope, response)).join())
            .unwrap_or_else(|_| {
                warn!(path = %path, "Telemetry thread panicked");
                None
            })
    }

    /// Submit on the current thread, logging failures.
    fn emit(&self, envelope: CallEnvelope, response: Value) -> Option<String> {
        let path = envelope.target_path.clone();
        let call_id = envelope.id;
        let duration_ms = envelope.duration_ms();

        match self.try_finish(envelope, response) {
            Ok(id) => {
                debug!(
                    path = %path,
                    call_id = %call_id,
                    ?duration_ms,
                    emitter = self.emitter.name(),
                    correlation_id = ?id,
                    "Telemetry emitted"
                );
                id
            }
            Err(e) => {
                warn!(
                    path = %path,
                    call_id = %call_id,
                    emitter = self.emitter.name(),
                    configuration = e.is_configuration(),
                    error = %e,
                    "Telemetry emission failed"
                );
                None
            }
        }
    }

    /// Emit on a blocking thread and wait for the correlation id.
    ///
    /// Runs inline when no tokio runtime is available.
    pub async fn finish_offloaded(
        self: Arc<Self>,
        envelope: CallEnvelope,
        response: Value,
    ) -> Option<String> {
        let Ok(handle) = Handle::try_current() else {
            return self.emit(envelope, response);
        };

        let path = envelope.target_path.clone();
        match handle
            .spawn_blocking(move || self.emit(envelope, response))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %path, error = %e, "Telemetry task failed");
                None
            }
        }
    }

    /// Emit on a blocking thread without waiting for it.
    ///
    /// Runs inline when no tokio runtime is available.
    pub fn finish_detached(self: &Arc<Self>, envelope: CallEnvelope, response: Value) {
        match Handle::try_current() {
            Ok(handle) => {
                let telemetry = Arc::clone(self);
                handle.spawn_blocking(move || {
                    telemetry.emit(envelope, response);
                });
            }
            Err(_) => {
                self.emit(envelope, response);
            }
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("emitter", &self.emitter.name())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("metadata", &self.metadata)
            .finish()
    }
}
