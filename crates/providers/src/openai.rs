//! OpenAI-compatible client, shaped like the vendor SDK so it can be wrapped.
//!
//! ```text
//! openai                              OpenAiModule
//!   .OpenAI(api_key=.., base_url=..)  class -> OpenAiClient
//!     .chat.completions.create(..)    pending call (value or chunk stream)
//!     .count_tokens(text)             ready call
//!     .base_url / .model              plain, writable
//! ```
//!
//! Works with OpenAI and any endpoint exposing `/chat/completions`.

use crate::sse::{SseDecoder, SseEvent};
use calltrace_config::ProviderConfig;
use calltrace_core::{
    ArgValue, Args, CallResult, Callable, ChunkStream, Constructor, Kwargs, Member,
    ProviderError, Resolved, Target, TargetResult,
};
use futures::StreamExt;
use serde_json::{Map, Value, json};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// The `openai` module. Its only member is the `OpenAI` class.
pub struct OpenAiModule {
    defaults: ProviderConfig,
}

impl OpenAiModule {
    /// `defaults` fill in whatever the constructor's keyword arguments omit.
    pub fn new(defaults: ProviderConfig) -> Self {
        Self { defaults }
    }
}

impl Target for OpenAiModule {
    fn get(&self, name: &str) -> TargetResult<Member> {
        match name {
            "OpenAI" => Ok(Member::Class(Arc::new(OpenAiClass {
                defaults: self.defaults.clone(),
            }))),
            _ => Err(missing("openai", name)),
        }
    }
}

struct OpenAiClass {
    defaults: ProviderConfig,
}

impl Constructor for OpenAiClass {
    fn construct(&self, args: Args, kwargs: Kwargs) -> TargetResult<Arc<dyn Target>> {
        if !args.is_empty() {
            return Err(ProviderError::InvalidArguments(
                "OpenAI() takes keyword arguments only".into(),
            ));
        }

        let mut config = self.defaults.clone();
        if let Some(key) = string_kwarg(&kwargs, "api_key")? {
            config.api_key = Some(key);
        }
        if let Some(url) = string_kwarg(&kwargs, "base_url")? {
            config.base_url = url;
        }
        if let Some(model) = string_kwarg(&kwargs, "model")? {
            config.default_model = model;
        }

        Ok(Arc::new(OpenAiClient::new(&config)?))
    }
}

fn string_kwarg(kwargs: &Kwargs, key: &str) -> TargetResult<Option<String>> {
    match kwargs.get(key) {
        None | Some(ArgValue::Json(Value::Null)) => Ok(None),
        Some(ArgValue::Json(Value::String(s))) => Ok(Some(s.clone())),
        Some(other) => Err(ProviderError::InvalidArguments(format!(
            "`{key}` must be a string, got {}",
            other.kind()
        ))),
    }
}

fn missing(target: &str, name: &str) -> ProviderError {
    ProviderError::MissingMember {
        target: target.into(),
        name: name.into(),
    }
}

/// Client settings exposed as plain members.
struct Settings {
    base_url: String,
    model: String,
}

struct Inner {
    api_key: String,
    settings: RwLock<Settings>,
    http: reqwest::Client,
}

impl Inner {
    fn base_url(&self) -> String {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        settings.base_url.clone()
    }

    fn model(&self) -> String {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        settings.model.clone()
    }

    async fn create(&self, body: Map<String, Value>, stream: bool) -> TargetResult<Resolved> {
        let url = format!("{}/chat/completions", self.base_url());
        debug!(model = ?body.get("model"), stream, "Sending chat completion request");

        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);
        if stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        if stream {
            return Ok(Resolved::Stream(chunk_stream(response)));
        }

        let value: Value = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        Ok(Resolved::Value(value))
    }
}

/// An OpenAI client instance.
#[derive(Clone)]
pub struct OpenAiClient {
    inner: Arc<Inner>,
}

impl OpenAiClient {
    /// Build a client. An empty or missing API key is rejected, as the
    /// vendor SDK does.
    pub fn new(config: &ProviderConfig) -> TargetResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ProviderError::AuthenticationFailed("no API key configured for OpenAI".into())
            })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                api_key,
                settings: RwLock::new(Settings {
                    base_url: config.base_url.trim_end_matches('/').to_string(),
                    model: config.default_model.clone(),
                }),
                http,
            }),
        })
    }

    pub fn base_url(&self) -> String {
        self.inner.base_url()
    }

    pub fn model(&self) -> String {
        self.inner.model()
    }
}

impl Target for OpenAiClient {
    fn get(&self, name: &str) -> TargetResult<Member> {
        match name {
            "chat" => Ok(Member::Object(Arc::new(Chat {
                inner: Arc::clone(&self.inner),
            }))),
            "count_tokens" => Ok(Member::Function(Arc::new(count_tokens))),
            "base_url" => Ok(Member::Value(json!(self.inner.base_url()))),
            "model" => Ok(Member::Value(json!(self.inner.model()))),
            _ => Err(missing("OpenAI", name)),
        }
    }

    fn set(&self, name: &str, value: Value) -> TargetResult<()> {
        let Value::String(text) = value else {
            return Err(ProviderError::InvalidArguments(format!(
                "`{name}` must be a string"
            )));
        };
        let mut settings = self.inner.settings.write().unwrap_or_else(PoisonError::into_inner);
        match name {
            "base_url" => settings.base_url = text.trim_end_matches('/').to_string(),
            "model" => settings.model = text,
            _ => return Err(ProviderError::ReadOnly(name.to_string())),
        }
        Ok(())
    }
}

/// `client.chat`
struct Chat {
    inner: Arc<Inner>,
}

impl Target for Chat {
    fn get(&self, name: &str) -> TargetResult<Member> {
        match name {
            "completions" => Ok(Member::Object(Arc::new(Completions {
                inner: Arc::clone(&self.inner),
            }))),
            _ => Err(missing("chat", name)),
        }
    }
}

/// `client.chat.completions`
struct Completions {
    inner: Arc<Inner>,
}

impl Target for Completions {
    fn get(&self, name: &str) -> TargetResult<Member> {
        match name {
            "create" => Ok(Member::Function(Arc::new(Create {
                inner: Arc::clone(&self.inner),
            }))),
            _ => Err(missing("completions", name)),
        }
    }
}

/// `client.chat.completions.create`
struct Create {
    inner: Arc<Inner>,
}

impl Callable for Create {
    fn call(&self, args: Args, kwargs: Kwargs) -> TargetResult<CallResult> {
        if !args.is_empty() {
            return Err(ProviderError::InvalidArguments(
                "create() takes keyword arguments only".into(),
            ));
        }

        let body = request_body(&kwargs, &self.inner.model())?;
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let inner = Arc::clone(&self.inner);

        Ok(CallResult::Pending(Box::pin(async move {
            inner.create(body, stream).await
        })))
    }
}

/// The JSON request body for `create`. The client's model fills in a
/// missing `model`.
pub fn request_body(kwargs: &Kwargs, default_model: &str) -> TargetResult<Map<String, Value>> {
    let mut body = Map::new();
    for (key, value) in kwargs {
        let Some(json) = value.as_json() else {
            return Err(ProviderError::InvalidArguments(format!(
                "`{key}` cannot be sent to the API"
            )));
        };
        body.insert(key.clone(), json.clone());
    }

    if !body.contains_key("model") {
        body.insert("model".into(), json!(default_model));
    }
    Ok(body)
}

async fn check_status(response: reqwest::Response) -> TargetResult<reqwest::Response> {
    let status = response.status().as_u16();
    if status == 200 {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = response.text().await.unwrap_or_default();
    warn!(status, body = %body, "Provider returned error");
    Err(status_error(status, body, retry_after))
}

/// Map a non-200 status to a provider error.
pub fn status_error(status: u16, body: String, retry_after: Option<u64>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Read the SSE body on a spawned task and forward each chunk.
fn chunk_stream(response: reqwest::Response) -> ChunkStream {
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
            };

            for event in decoder.push(&bytes) {
                match event {
                    SseEvent::Chunk(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                    SseEvent::Done => return,
                }
            }
        }

        if let Some(SseEvent::Chunk(chunk)) = decoder.finish() {
            let _ = tx.send(Ok(chunk)).await;
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// `count_tokens(text)`: a rough estimate of one token per four characters.
fn count_tokens(args: Args, kwargs: Kwargs) -> TargetResult<CallResult> {
    let text = args
        .first()
        .or_else(|| kwargs.get("text"))
        .and_then(ArgValue::as_json)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ProviderError::InvalidArguments("count_tokens() takes one text argument".into())
        })?;
    let tokens = estimate_tokens(text);
    Ok(CallResult::Ready(Resolved::Value(json!(tokens))))
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
