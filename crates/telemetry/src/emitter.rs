//! The composite analytics emitter.
//!
//! Sends each record to the remote tracking endpoint and writes it to the
//! log store. The remote outcome is the emitter's outcome; a log-store
//! failure is logged and otherwise ignored.

use crate::logstore::SqlLogStore;
use crate::remote::RemoteTracker;
use calltrace_config::AppConfig;
use calltrace_core::{TelemetryEmitter, TelemetryError, TelemetryRecord};
use tracing::{info, warn};

/// Remote endpoint plus log store, both optional.
#[derive(Default)]
pub struct AnalyticsEmitter {
    remote: Option<RemoteTracker>,
    log_store: Option<SqlLogStore>,
}

impl AnalyticsEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, remote: RemoteTracker) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_log_store(mut self, store: SqlLogStore) -> Self {
        self.log_store = Some(store);
        self
    }

    /// Build the sinks enabled in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, TelemetryError> {
        let mut emitter = Self::new();

        if config.tracking.enabled {
            emitter.remote = Some(RemoteTracker::from_config(&config.tracking));
        }
        emitter.log_store = SqlLogStore::from_config(&config.log_store)?;

        info!(
            remote = ?emitter.remote.as_ref().map(RemoteTracker::base_url),
            log_table = ?emitter.log_store.as_ref().map(SqlLogStore::table),
            "Analytics emitter ready"
        );
        Ok(emitter)
    }

    pub fn remote(&self) -> Option<&RemoteTracker> {
        self.remote.as_ref()
    }

    pub fn log_store(&self) -> Option<&SqlLogStore> {
        self.log_store.as_ref()
    }
}

impl TelemetryEmitter for AnalyticsEmitter {
    fn name(&self) -> &str {
        "analytics"
    }

    fn submit(&self, record: TelemetryRecord) -> Result<Option<String>, TelemetryError> {
        let outcome = match &self.remote {
            Some(remote) => remote.track_request(&record),
            None => Ok(None),
        };

        if let Some(store) = &self.log_store {
            if let Err(e) = store.write(&record) {
                warn!(
                    function = %record.function_name,
                    table = store.table(),
                    error = %e,
                    "Log store write failed"
                );
            }
        }

        outcome
    }
}
