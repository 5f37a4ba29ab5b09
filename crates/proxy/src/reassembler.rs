//! Stream reassembly.
//!
//! A streamed response reaches the caller chunk by chunk, exactly as the
//! provider produced it. Alongside, every chunk is appended to a buffer and
//! checked against the provider's terminal predicate. The first terminal
//! chunk folds the buffer into one reconciled response and triggers the
//! call's single emission.
//!
//! Both pull styles drive the same `Reassembly` state machine:
//! [`BlockingReassembler`] is an [`Iterator`], [`SuspendingReassembler`] is a
//! [`Stream`].
//!
//! A stream that is dropped or runs out before its terminal chunk never
//! emits.

use crate::delivery::Delivery;
use crate::finish::Telemetry;
use calltrace_core::{
    CallEnvelope, ChunkIter, ChunkStream, ProviderError, ProviderKind, TelemetryError,
};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use serde_json::{Value, json};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tracing::debug;

/// Fold a chunk sequence into one response.
///
/// The last chunk is the envelope: its `choices[0]` is replaced by
/// `{"role", "content"}` where `role` is the last non-empty role seen (or
/// `""`) and `content` is every content fragment concatenated in order.
/// Chunks without `choices[0].delta`, such as filter-result preambles, are
/// skipped; at least one chunk must carry a delta.
pub fn reconcile(chunks: &[Value]) -> Result<Value, TelemetryError> {
    if chunks.is_empty() {
        return Err(TelemetryError::UnexpectedChunkShape("no chunks".into()));
    }

    let mut deltas = chunks
        .iter()
        .filter_map(|c| c.pointer("/choices/0/delta"))
        .peekable();
    if deltas.peek().is_none() {
        return Err(TelemetryError::UnexpectedChunkShape(
            "no chunk has choices[0].delta".into(),
        ));
    }

    let mut role = "";
    let mut content = String::new();
    for delta in deltas {
        if let Some(r) = delta.get("role").and_then(Value::as_str).filter(|r| !r.is_empty()) {
            role = r;
        }
        if let Some(c) = delta.get("content").and_then(Value::as_str) {
            content.push_str(c);
        }
    }
    let reconciled = json!({ "role": role, "content": content });

    let mut last = chunks.last().cloned().unwrap_or(Value::Null);
    let choices = last
        .get_mut("choices")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| {
            TelemetryError::UnexpectedChunkShape("last chunk has no choices array".into())
        })?;
    match choices.first_mut() {
        Some(slot) => *slot = reconciled,
        None => choices.push(reconciled),
    }
    Ok(last)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Accumulating,
    Terminated,
}

/// What the reassembler must do after observing a chunk.
enum Step {
    Pass,
    Emit(CallEnvelope, Value),
}

/// State shared by both pull styles.
struct Reassembly {
    provider: ProviderKind,
    phase: Phase,
    buffer: Vec<Value>,
    /// Taken on termination, so emission can happen at most once.
    envelope: Option<CallEnvelope>,
    wants_id: bool,
    correlation_id: Option<String>,
}

impl Reassembly {
    fn new(envelope: CallEnvelope) -> Self {
        Self {
            provider: envelope.provider.clone(),
            phase: Phase::Accumulating,
            buffer: Vec::new(),
            wants_id: envelope.return_correlation_id,
            envelope: Some(envelope),
            correlation_id: None,
        }
    }

    fn observe(&mut self, chunk: &Value) -> Step {
        if self.phase == Phase::Terminated {
            return Step::Pass;
        }

        self.buffer.push(chunk.clone());
        if !self.provider.is_terminal(chunk) {
            return Step::Pass;
        }

        self.phase = Phase::Terminated;
        let buffer = std::mem::take(&mut self.buffer);
        let Some(envelope) = self.envelope.take() else {
            return Step::Pass;
        };

        let response = reconcile(&buffer).unwrap_or_else(|e| {
            debug!(
                path = %envelope.target_path,
                chunks = buffer.len(),
                error = %e,
                "Reporting an empty reconciled response"
            );
            Value::String(String::new())
        });
        Step::Emit(envelope, response)
    }

    fn deliver(&self, chunk: Value) -> Delivery<Value> {
        Delivery::new(chunk, self.wants_id, self.correlation_id.clone())
    }

    fn exhausted(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            debug!(
                path = %envelope.target_path,
                provider = %self.provider,
                chunks = self.buffer.len(),
                "Stream ended without a terminal chunk; nothing emitted"
            );
        }
    }
}

/// Blocking-pull reassembler.
///
/// Emission happens inside the `next` call that pulls the terminal chunk.
pub struct BlockingReassembler {
    inner: ChunkIter,
    state: Reassembly,
    telemetry: Arc<Telemetry>,
}

impl BlockingReassembler {
    pub fn new(inner: ChunkIter, envelope: CallEnvelope, telemetry: Arc<Telemetry>) -> Self {
        Self {
            inner,
            state: Reassembly::new(envelope),
            telemetry,
        }
    }

    /// Whether the terminal chunk has been seen.
    pub fn is_terminated(&self) -> bool {
        self.state.phase == Phase::Terminated
    }
}

impl Iterator for BlockingReassembler {
    type Item = Result<Delivery<Value>, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = match self.inner.next() {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Some(Err(e)),
            None => {
                self.state.exhausted();
                return None;
            }
        };

        if let Step::Emit(envelope, response) = self.state.observe(&chunk) {
            self.state.correlation_id = self.telemetry.finish(envelope, response);
        }
        Some(Ok(self.state.deliver(chunk)))
    }
}

/// A terminal chunk held back until its emission returns an id.
struct HeldChunk {
    chunk: Value,
    emission: BoxFuture<'static, Option<String>>,
}

/// Suspending-pull reassembler.
///
/// Emission runs on a blocking thread. When the caller asked for the
/// correlation id, the terminal chunk is held until the id arrives;
/// otherwise the emission is detached and the chunk is yielded at once.
pub struct SuspendingReassembler {
    inner: ChunkStream,
    state: Reassembly,
    telemetry: Arc<Telemetry>,
    held: Option<HeldChunk>,
}

impl SuspendingReassembler {
    pub fn new(inner: ChunkStream, envelope: CallEnvelope, telemetry: Arc<Telemetry>) -> Self {
        Self {
            inner,
            state: Reassembly::new(envelope),
            telemetry,
            held: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state.phase == Phase::Terminated
    }
}

impl Stream for SuspendingReassembler {
    type Item = Result<Delivery<Value>, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(held) = this.held.as_mut() {
                let id = ready!(held.emission.poll_unpin(cx));
                let chunk = std::mem::take(&mut held.chunk);
                this.held = None;
                this.state.correlation_id = id;
                return Poll::Ready(Some(Ok(this.state.deliver(chunk))));
            }

            let chunk = match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    this.state.exhausted();
                    return Poll::Ready(None);
                }
            };

            match this.state.observe(&chunk) {
                Step::Emit(envelope, response) if this.state.wants_id => {
                    let emission = Arc::clone(&this.telemetry)
                        .finish_offloaded(envelope, response)
                        .boxed();
                    this.held = Some(HeldChunk { chunk, emission });
                }
                Step::Emit(envelope, response) => {
                    this.telemetry.finish_detached(envelope, response);
                    return Poll::Ready(Some(Ok(this.state.deliver(chunk))));
                }
                Step::Pass => return Poll::Ready(Some(Ok(this.state.deliver(chunk)))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltrace_core::Kwargs;
    use calltrace_telemetry::InMemoryEmitter;

    fn chunk(role: Option<&str>, content: Option<&str>, finish: Option<&str>) -> Value {
        let mut delta = json!({});
        if let Some(r) = role {
            delta["role"] = json!(r);
        }
        if let Some(c) = content {
            delta["content"] = json!(c);
        }
        json!({
            "id": "chatcmpl-7",
            "object": "chat.completion.chunk",
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
        })
    }

    fn envelope(provider: ProviderKind, wants_id: bool) -> CallEnvelope {
        let mut env = CallEnvelope::open("openai.chat.completions.create", provider, vec![], Kwargs::new())
            .with_correlation_id(wants_id);
        env.mark_ended();
        env
    }

    fn telemetry(emitter: &Arc<InMemoryEmitter>) -> Arc<Telemetry> {
        Arc::new(Telemetry::new(emitter.clone(), Some("pl-key".into())))
    }

    #[test]
    fn reconcile_concatenates_and_keeps_last_role() {
        let chunks = vec![
            chunk(Some("assistant"), Some("Hel"), None),
            chunk(None, Some("lo, "), None),
            chunk(Some(""), Some("world"), Some("stop")),
        ];
        let out = reconcile(&chunks).unwrap();
        assert_eq!(out["choices"][0], json!({"role": "assistant", "content": "Hello, world"}));
        assert_eq!(out["id"], json!("chatcmpl-7"));
        assert_eq!(out["model"], json!("gpt-4o"));
    }

    #[test]
    fn reconcile_skips_null_content() {
        let chunks = vec![
            chunk(Some("assistant"), None, None),
            json!({"choices": [{"delta": {"content": null}, "finish_reason": "stop"}]}),
        ];
        let out = reconcile(&chunks).unwrap();
        assert_eq!(out["choices"][0]["content"], json!(""));
    }

    #[test]
    fn reconcile_defaults_a_missing_role_to_empty() {
        let chunks = vec![chunk(None, Some("a"), None), chunk(None, Some("b"), Some("stop"))];
        let out = reconcile(&chunks).unwrap();
        assert_eq!(out["choices"][0], json!({"role": "", "content": "ab"}));
    }

    #[test]
    fn reconcile_skips_chunks_without_a_delta() {
        let chunks = vec![
            json!({"id": "", "choices": [], "prompt_filter_results": []}),
            chunk(Some("assistant"), Some("Hi"), None),
            chunk(None, Some(" there"), Some("stop")),
        ];
        let out = reconcile(&chunks).unwrap();
        assert_eq!(out["choices"][0], json!({"role": "assistant", "content": "Hi there"}));
    }

    #[test]
    fn reconcile_rejects_unknown_shapes() {
        assert!(reconcile(&[]).is_err());
        assert!(reconcile(&[json!({"text": "hi"})]).is_err());
        let no_choices = vec![chunk(None, Some("a"), None), json!({"usage": {}})];
        assert!(matches!(
            reconcile(&no_choices),
            Err(TelemetryError::UnexpectedChunkShape(_))
        ));
    }

    #[test]
    fn unexpected_shape_emits_empty_response() {
        let emitter = Arc::new(InMemoryEmitter::new());
        let chunks: ChunkIter = Box::new(
            vec![Ok(json!({"choices": [{"finish_reason": "stop"}]}))].into_iter(),
        );
        let mut stream =
            BlockingReassembler::new(chunks, envelope(ProviderKind::OpenAi, false), telemetry(&emitter));

        let delivered = stream.next().unwrap().unwrap();
        assert_eq!(delivered.value()["choices"][0]["finish_reason"], json!("stop"));
        assert_eq!(emitter.count(), 1);
        assert_eq!(emitter.last().unwrap().response, json!(""));
    }

    #[test]
    fn chunks_after_termination_pass_through() {
        let emitter = Arc::new(InMemoryEmitter::with_correlation_id("req-9"));
        let chunks: ChunkIter = Box::new(
            vec![
                Ok(chunk(Some("assistant"), Some("a"), Some("stop"))),
                Ok(chunk(None, Some("b"), Some("stop"))),
            ]
            .into_iter(),
        );
        let stream =
            BlockingReassembler::new(chunks, envelope(ProviderKind::OpenAi, true), telemetry(&emitter));

        let delivered: Vec<_> = stream.map(Result::unwrap).collect();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].correlation_id(), Some("req-9"));
        assert_eq!(delivered[1].correlation_id(), Some("req-9"));
        assert_eq!(emitter.count(), 1);
    }

    #[test]
    fn unknown_providers_never_terminate() {
        let emitter = Arc::new(InMemoryEmitter::new());
        let chunks: ChunkIter = Box::new(vec![Ok(chunk(None, Some("a"), Some("stop")))].into_iter());
        let mut stream = BlockingReassembler::new(
            chunks,
            envelope(ProviderKind::from("cohere"), false),
            telemetry(&emitter),
        );

        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
        assert!(!stream.is_terminated());
        assert_eq!(emitter.count(), 0);
    }

    #[test]
    fn provider_errors_pass_through_unchanged() {
        let emitter = Arc::new(InMemoryEmitter::new());
        let chunks: ChunkIter = Box::new(
            vec![
                Ok(chunk(Some("assistant"), Some("a"), None)),
                Err(ProviderError::StreamInterrupted("reset".into())),
            ]
            .into_iter(),
        );
        let mut stream =
            BlockingReassembler::new(chunks, envelope(ProviderKind::OpenAi, false), telemetry(&emitter));

        assert!(stream.next().unwrap().is_ok());
        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(m) if m == "reset"));
        assert_eq!(emitter.count(), 0);
    }

    #[tokio::test]
    async fn suspending_holds_terminal_chunk_for_the_id() {
        let emitter = Arc::new(InMemoryEmitter::with_correlation_id("req-3"));
        let chunks: ChunkStream = Box::pin(futures::stream::iter(vec![
            Ok(chunk(Some("assistant"), Some("x"), None)),
            Ok(chunk(None, Some("y"), Some("length"))),
        ]));
        let mut stream =
            SuspendingReassembler::new(chunks, envelope(ProviderKind::OpenAi, true), telemetry(&emitter));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.correlation_id(), None);
        assert!(first.is_correlated());

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.correlation_id(), Some("req-3"));
        assert!(stream.is_terminated());
        assert!(stream.next().await.is_none());

        let record = emitter.last().unwrap();
        assert_eq!(record.response["choices"][0]["content"], json!("xy"));
        assert_eq!(emitter.count(), 1);
    }
}
