//! Argument values passed through an intercepted call.
//!
//! Wrapped clients accept arbitrary arguments, some of which are plain
//! structured data (model names, messages, numbers) and some of which are
//! not (callbacks, open handles). Both are forwarded to the target; only the
//! plain ones are ever transmitted to telemetry sinks.

use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single positional or keyword argument.
#[derive(Clone)]
pub enum ArgValue {
    /// A plain structured value that can be serialized as JSON.
    Json(Value),
    /// Anything else. Forwarded to the target, never serialized.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl ArgValue {
    /// Wrap an arbitrary non-serializable value.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }

    /// The JSON value, if this argument is plain.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Opaque(_) => None,
        }
    }

    /// Downcast an opaque argument.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(any) => any.downcast_ref::<T>(),
            Self::Json(_) => None,
        }
    }

    /// Short description of the value's shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(Value::Null) => "null",
            Self::Json(Value::Bool(_)) => "a boolean",
            Self::Json(Value::Number(_)) => "a number",
            Self::Json(Value::String(_)) => "a string",
            Self::Json(Value::Array(_)) => "a list",
            Self::Json(Value::Object(_)) => "an object",
            Self::Opaque(_) => "an opaque value",
        }
    }
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Json(Value::String(value.to_string()))
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Json(Value::String(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Json(Value::Bool(value))
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(value: Vec<String>) -> Self {
        Self::Json(Value::Array(value.into_iter().map(Value::String).collect()))
    }
}

/// Positional arguments.
pub type Args = Vec<ArgValue>;

/// Keyword arguments, keyed by name.
pub type Kwargs = BTreeMap<String, ArgValue>;

/// Keep only the plain keyword arguments. Opaque values are dropped
/// silently: they are not an error, they are just never transmitted.
pub fn plain_kwargs(kwargs: &Kwargs) -> serde_json::Map<String, Value> {
    kwargs
        .iter()
        .filter_map(|(k, v)| v.as_json().map(|json| (k.clone(), json.clone())))
        .collect()
}

/// Plain view of positional arguments. Opaque positions become `null` so
/// that argument indices stay meaningful.
pub fn plain_args(args: &[ArgValue]) -> Vec<Value> {
    args.iter()
        .map(|a| a.as_json().cloned().unwrap_or(Value::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opaque_kwargs_are_dropped() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("model".into(), "gpt-4o".into());
        kwargs.insert("callback".into(), ArgValue::opaque(|| 42));
        kwargs.insert("temperature".into(), json!(0.2).into());

        let plain = plain_kwargs(&kwargs);
        assert_eq!(plain.len(), 2);
        assert_eq!(plain["model"], json!("gpt-4o"));
        assert!(!plain.contains_key("callback"));
    }

    #[test]
    fn opaque_args_keep_their_position() {
        let args = vec![ArgValue::from("a"), ArgValue::opaque(7u8), ArgValue::from(true)];
        assert_eq!(plain_args(&args), vec![json!("a"), Value::Null, json!(true)]);
    }

    #[test]
    fn opaque_values_downcast() {
        let arg = ArgValue::opaque(String::from("handle"));
        assert_eq!(arg.downcast_ref::<String>().map(String::as_str), Some("handle"));
        assert!(arg.as_json().is_none());
        assert_eq!(arg.kind(), "an opaque value");
    }
}
