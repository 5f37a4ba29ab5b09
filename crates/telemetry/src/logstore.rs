//! Relational log store on SQLite.
//!
//! The store does not own a schema. Each record is prepared as a flat row
//! (see [`crate::flatten`]) and written to the columns the configured table
//! actually has; everything else is dropped with a warning.

use crate::flatten::{Item, prepare};
use calltrace_config::{LogStoreConfig, is_identifier};
use calltrace_core::{TelemetryError, TelemetryRecord};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A log store writing one row per call into an existing table.
pub struct SqlLogStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqlLogStore {
    /// Open the database at `path`.
    ///
    /// The file is created if missing, but the table must already exist
    /// before the first write.
    pub fn open(path: &Path, table: &str) -> Result<Self, TelemetryError> {
        let conn = Connection::open(path).map_err(|e| {
            TelemetryError::LogStore(format!("Failed to open {}: {e}", path.display()))
        })?;
        info!("Log store opened at {}", path.display());
        Self::from_connection(conn, table)
    }

    /// Wrap an existing connection (useful for testing).
    pub fn from_connection(conn: Connection, table: &str) -> Result<Self, TelemetryError> {
        if !is_identifier(table) {
            return Err(TelemetryError::LogStore(format!(
                "`{table}` is not a valid table name"
            )));
        }
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    /// Build the store from configuration. `None` when it is disabled.
    pub fn from_config(config: &LogStoreConfig) -> Result<Option<Self>, TelemetryError> {
        if !config.enabled {
            return Ok(None);
        }
        let path = config.path.as_deref().ok_or_else(|| {
            TelemetryError::LogStore("log store enabled without a path".into())
        })?;
        Self::open(path, &config.table).map(Some)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TelemetryError> {
        self.conn
            .lock()
            .map_err(|_| TelemetryError::LogStore("connection lock poisoned".into()))
    }

    /// Column names of the table.
    pub fn columns(&self) -> Result<HashSet<String>, TelemetryError> {
        let conn = self.lock()?;
        table_columns(&conn, &self.table)
    }

    /// Write one record.
    pub fn write(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        self.insert(prepare(record))
    }

    /// Insert a prepared row, keeping only known columns.
    pub fn insert(&self, item: Item) -> Result<(), TelemetryError> {
        let conn = self.lock()?;
        let allowed = table_columns(&conn, &self.table)?;
        let row = filter_columns(item, &allowed)?;

        let columns: Vec<String> = row.keys().map(|k| format!("\"{k}\"")).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );

        conn.execute(&sql, rusqlite::params_from_iter(row.values().map(to_sql)))
            .map_err(|e| TelemetryError::LogStore(format!("Insert failed: {e}")))?;

        debug!(table = %self.table, columns = row.len(), "Logged call");
        Ok(())
    }

    /// Set the `score` of the row whose `response_id` matches. Returns the
    /// number of updated rows.
    pub fn score(&self, response_id: &str, score: i64) -> Result<usize, TelemetryError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE \"{}\" SET score = ?1 WHERE response_id = ?2",
            self.table
        );
        conn.execute(&sql, rusqlite::params![score, response_id])
            .map_err(|e| TelemetryError::LogStore(format!("Score update failed: {e}")))
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, TelemetryError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .map_err(|e| TelemetryError::LogStore(e.to_string()))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| TelemetryError::LogStore(e.to_string()))?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(|e| TelemetryError::LogStore(e.to_string()))?;

    if columns.is_empty() {
        return Err(TelemetryError::LogStore(format!(
            "table `{table}` does not exist"
        )));
    }
    Ok(columns)
}

/// Keep the keys that name a column. Dropping every key is an error.
fn filter_columns(item: Item, allowed: &HashSet<String>) -> Result<Item, TelemetryError> {
    let mut row = Item::new();
    for (key, value) in item {
        if allowed.contains(&key) {
            row.insert(key, value);
        } else {
            warn!(key = %key, "Key is not a column of the log table and will be ignored");
        }
    }

    if row.is_empty() {
        return Err(TelemetryError::LogStore(
            "none of the item's keys is a column of the log table".into(),
        ));
    }
    Ok(row)
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
