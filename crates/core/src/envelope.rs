//! Call envelopes — one per logical provider invocation.
//!
//! An envelope is created when the proxy intercepts a call, carries the
//! identity, arguments, tags and timing of that call, and is consumed by the
//! single telemetry emission the call produces.

use crate::emitter::TelemetryRecord;
use crate::provider::ProviderKind;
use crate::value::{plain_args, plain_kwargs, Args, Kwargs};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Everything known about one intercepted call.
#[derive(Debug, Clone)]
pub struct CallEnvelope {
    /// Local identifier, used to correlate log lines.
    pub id: Uuid,
    /// Dotted path of the invoked member (e.g. `openai.chat.completions.create`).
    pub target_path: String,
    /// The backend the call went to.
    pub provider: ProviderKind,
    /// Positional arguments as forwarded.
    pub args: Args,
    /// Keyword arguments as forwarded (reserved controls already removed).
    pub kwargs: Kwargs,
    /// Caller-supplied tags.
    pub tags: Option<Vec<String>>,
    /// When the call was intercepted.
    pub start_time: DateTime<Utc>,
    /// When the wrapped call produced its result.
    pub end_time: Option<DateTime<Utc>>,
    /// Whether the caller wants the correlation id back.
    pub return_correlation_id: bool,
}

impl CallEnvelope {
    /// Open an envelope, stamping the start time.
    pub fn open(
        target_path: impl Into<String>,
        provider: ProviderKind,
        args: Args,
        kwargs: Kwargs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_path: target_path.into(),
            provider,
            args,
            kwargs,
            tags: None,
            start_time: Utc::now(),
            end_time: None,
            return_correlation_id: false,
        }
    }

    /// Attach caller tags.
    pub fn with_tags(mut self, tags: Option<Vec<String>>) -> Self {
        self.tags = tags;
        self
    }

    /// Request the correlation id back from the emission.
    pub fn with_correlation_id(mut self, wanted: bool) -> Self {
        self.return_correlation_id = wanted;
        self
    }

    /// Stamp the end time. Later calls keep the first stamp.
    pub fn mark_ended(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }

    /// Call duration in milliseconds, if the call has ended.
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time.map(|end| {
            end.signed_duration_since(self.start_time)
                .num_milliseconds()
                .max(0) as u64
        })
    }

    /// Consume the envelope into the record handed to the emitter.
    ///
    /// Opaque keyword arguments are dropped here.
    pub fn into_record(
        self,
        response: Value,
        api_key: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> TelemetryRecord {
        let kwargs = plain_kwargs(&self.kwargs);
        TelemetryRecord {
            function_name: self.target_path,
            provider_type: self.provider,
            args: plain_args(&self.args),
            request: Some(Value::Object(kwargs.clone())),
            kwargs,
            tags: self.tags,
            response,
            request_start_time: self.start_time,
            request_end_time: self.end_time.unwrap_or_else(Utc::now),
            api_key: api_key.into(),
            return_correlation_id: self.return_correlation_id,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ArgValue;
    use serde_json::json;

    fn envelope() -> CallEnvelope {
        let mut kwargs = Kwargs::new();
        kwargs.insert("model".into(), "gpt-4o".into());
        kwargs.insert("on_token".into(), ArgValue::opaque(String::from("cb")));
        CallEnvelope::open(
            "openai.chat.completions.create",
            ProviderKind::OpenAi,
            vec![],
            kwargs,
        )
    }

    #[test]
    fn end_time_is_stamped_once() {
        let mut env = envelope();
        assert!(env.duration_ms().is_none());
        env.mark_ended();
        let first = env.end_time;
        env.mark_ended();
        assert_eq!(env.end_time, first);
        assert!(env.duration_ms().is_some());
    }

    #[test]
    fn record_drops_opaque_kwargs() {
        let mut env = envelope()
            .with_tags(Some(vec!["prod".into()]))
            .with_correlation_id(true);
        env.mark_ended();
        let record = env.into_record(json!({"ok": true}), "pl-key", None);

        assert_eq!(record.function_name, "openai.chat.completions.create");
        assert_eq!(record.kwargs.len(), 1);
        assert_eq!(record.kwargs["model"], json!("gpt-4o"));
        assert_eq!(record.tags, Some(vec!["prod".to_string()]));
        assert!(record.return_correlation_id);
        assert!(record.request_end_time >= record.request_start_time);
    }
}
