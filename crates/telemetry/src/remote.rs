//! Remote tracking endpoint client.
//!
//! Speaks the PromptLayer-compatible REST surface:
//! - `POST {base}/track-request` — one record per call, answers with a
//!   `request_id`;
//! - `POST {base}/library-track-score` — attach a score to a tracked request.

use calltrace_config::TrackingConfig;
use calltrace_core::{TelemetryError, TelemetryRecord};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Blocking client for the tracking endpoint.
///
/// The HTTP client is built on first use, so that construction stays cheap
/// and happens on whichever thread first submits.
pub struct RemoteTracker {
    base_url: String,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl RemoteTracker {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: OnceLock::new(),
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> Result<&Client, TelemetryError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TelemetryError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(self.client.get_or_init(|| built))
    }

    /// Track one call. Returns the endpoint's `request_id` when the record
    /// asks for it.
    pub fn track_request(&self, record: &TelemetryRecord) -> Result<Option<String>, TelemetryError> {
        let url = format!("{}/track-request", self.base_url);
        let body = request_body(record);

        debug!(url = %url, function = %record.function_name, "Tracking request");

        let response = self
            .client()?
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| TelemetryError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status, body = %body, "Tracking endpoint rejected the request");
            return Err(TelemetryError::Rejected { status, body });
        }

        if !record.return_correlation_id {
            return Ok(None);
        }

        let payload: Value = response
            .json()
            .map_err(|e| TelemetryError::Transport(format!("Failed to parse response: {e}")))?;
        Ok(request_id(&payload))
    }

    /// Attach a score to a tracked request. Returns whether the endpoint
    /// accepted it.
    pub fn track_score(
        &self,
        request_id: &str,
        score: i64,
        name: Option<&str>,
        api_key: &str,
    ) -> Result<bool, TelemetryError> {
        let url = format!("{}/library-track-score", self.base_url);
        let body = json!({
            "request_id": request_id,
            "score": score,
            "api_key": api_key,
            "name": name,
        });

        let response = self
            .client()?
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| TelemetryError::Transport(e.to_string()))?;

        let accepted = response.status().as_u16() == 200;
        if !accepted {
            warn!(status = response.status().as_u16(), request_id, "Score was not accepted");
        }
        Ok(accepted)
    }
}

/// JSON body of a `track-request` call.
pub fn request_body(record: &TelemetryRecord) -> Value {
    json!({
        "function_name": record.function_name,
        "provider_type": record.provider_type.as_str(),
        "args": record.args,
        "kwargs": record.kwargs,
        "api_key": record.api_key,
        "tags": record.tags,
        "request_response": record.response,
        "request_start_time": epoch_secs(record.request_start_time),
        "request_end_time": epoch_secs(record.request_end_time),
        "metadata": record.metadata,
    })
}

/// Seconds since the Unix epoch, with microsecond precision.
pub fn epoch_secs(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}

/// The `request_id` of a `track-request` answer, as a string.
fn request_id(payload: &Value) -> Option<String> {
    match payload.get("request_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltrace_core::ProviderKind;
    use chrono::TimeZone;
    use serde_json::Map;

    fn record() -> TelemetryRecord {
        let mut kwargs = Map::new();
        kwargs.insert("model".into(), json!("gpt-4o"));
        TelemetryRecord {
            function_name: "openai.chat.completions.create".into(),
            provider_type: ProviderKind::OpenAi,
            args: vec![],
            kwargs,
            tags: Some(vec!["prod".into()]),
            request: None,
            response: json!({"choices": [{"message": {"content": "hi"}}]}),
            request_start_time: Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap(),
            request_end_time: Utc.timestamp_opt(1_700_000_001, 0).unwrap(),
            api_key: "pl-key".into(),
            return_correlation_id: true,
            metadata: None,
        }
    }

    #[test]
    fn body_has_the_tracking_fields() {
        let body = request_body(&record());
        assert_eq!(body["function_name"], json!("openai.chat.completions.create"));
        assert_eq!(body["provider_type"], json!("openai"));
        assert_eq!(body["kwargs"]["model"], json!("gpt-4o"));
        assert_eq!(body["tags"], json!(["prod"]));
        assert_eq!(body["api_key"], json!("pl-key"));
        assert_eq!(body["request_start_time"], json!(1_700_000_000.5));
        assert_eq!(body["request_end_time"], json!(1_700_000_001.0));
        assert!(body["metadata"].is_null());
        assert!(body.get("request").is_none());
    }

    #[test]
    fn request_ids_may_be_numbers() {
        assert_eq!(request_id(&json!({"request_id": 42})).as_deref(), Some("42"));
        assert_eq!(request_id(&json!({"request_id": "abc"})).as_deref(), Some("abc"));
        assert_eq!(request_id(&json!({"success": true})), None);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let tracker = RemoteTracker::new("http://localhost:9000/", Duration::from_secs(1));
        assert_eq!(tracker.base_url(), "http://localhost:9000");
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let tracker = RemoteTracker::new("http://127.0.0.1:1", Duration::from_secs(2));
        let err = tracker.track_request(&record()).unwrap_err();
        assert!(matches!(err, TelemetryError::Transport(_)));
        assert!(!err.is_configuration());
    }
}
