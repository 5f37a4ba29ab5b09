//! Turning a telemetry record into one flat log row.
//!
//! The log store adapts to whatever columns its table has, so a record is
//! first prepared as a flat map of `column -> value`:
//!
//! ```text
//! {"kwargs": {"model": "gpt-4o"}}     ->  {"kwargs_model": "gpt-4o"}   (flatten)
//! {"kwargs_messages": [...]}          ->  {"system_msg", "messages"}    (lift messages)
//! {"request_response_choices": [...]} ->  {"response": "..."}           (lift response)
//! {"kwargs_model": ...}               ->  {"model": ...}                (strip prefixes)
//! ```
//!
//! The API key is never part of a row.

use crate::remote::epoch_secs;
use calltrace_core::TelemetryRecord;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::warn;

/// A flat row, keyed by column name.
pub type Item = Map<String, Value>;

/// Build the log row for `record`.
pub fn prepare(record: &TelemetryRecord) -> Item {
    let mut base = Map::new();
    base.insert("function_name".into(), json!(record.function_name));
    base.insert("provider_type".into(), json!(record.provider_type.as_str()));
    base.insert("args".into(), json!(record.args));
    base.insert("kwargs".into(), Value::Object(record.kwargs.clone()));
    base.insert("tags".into(), json!(record.tags));
    base.insert("request_response".into(), record.response.clone());
    base.insert("request_start_time".into(), json!(epoch_secs(record.request_start_time)));
    base.insert("request_end_time".into(), json!(epoch_secs(record.request_end_time)));
    base.insert("metadata".into(), json!(record.metadata));

    // A request identical to the kwargs adds nothing but duplicate columns.
    if let Some(request) = &record.request {
        let duplicate = matches!(request, Value::Object(obj) if *obj == record.kwargs);
        if !duplicate {
            base.insert("request".into(), request.clone());
        }
    }

    let mut item = flatten(&base);
    lift_messages(&mut item);
    lift_response(&mut item);
    strip_prefix(&mut item, "kwargs_");
    strip_prefix(&mut item, "request_");
    item.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    item
}

/// Flatten nested objects into `parent_child` keys. Arrays are kept as
/// values.
pub fn flatten(map: &Map<String, Value>) -> Item {
    let mut out = Map::new();
    flatten_into("", map, &mut out);
    out
}

fn flatten_into(prefix: &str, map: &Map<String, Value>, out: &mut Item) {
    for (key, value) in map {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(&key, inner, out),
            other => {
                out.insert(key, other.clone());
            }
        }
    }
}

/// Replace `kwargs_messages` by `system_msg` and `messages` columns.
pub fn lift_messages(item: &mut Item) {
    let messages = match item.remove("kwargs_messages") {
        Some(Value::Array(messages)) => messages,
        _ => Vec::new(),
    };

    if messages.is_empty() {
        warn!("Logged item has no chat messages");
    }

    for (key, value) in messages_to_columns(&messages) {
        item.insert(key, value);
    }
}

/// The last `system` message becomes `system_msg`; every other message is
/// appended to `messages` as a `role:\ncontent\n\n` block.
pub fn messages_to_columns(messages: &[Value]) -> Item {
    let mut columns = Map::new();
    let mut transcript = String::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or_default();
        let content = message.get("content").and_then(Value::as_str).unwrap_or_default();
        if role == "system" {
            columns.insert("system_msg".into(), json!(content));
        } else {
            transcript.push_str(role);
            transcript.push_str(":\n");
            transcript.push_str(content);
            transcript.push_str("\n\n");
        }
    }

    columns.insert("messages".into(), json!(transcript));
    columns
}

/// Copy the response text to a top-level `response` column.
///
/// Reconciled streams carry it at `choices[0].content`, immediate
/// responses at `choices[0].message.content`.
pub fn lift_response(item: &mut Item) {
    let Some(first) = item
        .get("request_response_choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return;
    };

    let text = first
        .get("content")
        .or_else(|| first.pointer("/message/content"))
        .cloned();
    if let Some(text) = text {
        item.insert("response".into(), text);
    }
}

/// Strip `prefix` from every key that has it. A stripped key replaces an
/// existing one with a warning.
pub fn strip_prefix(item: &mut Item, prefix: &str) {
    let keys: Vec<String> = item
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect();

    for key in keys {
        let stripped = key[prefix.len()..].to_string();
        if stripped.is_empty() {
            continue;
        }
        if item.contains_key(&stripped) {
            warn!(prefix, key = %stripped, "Removing prefix overwrites an existing key");
        }
        if let Some(value) = item.remove(&key) {
            item.insert(stripped, value);
        }
    }
}
