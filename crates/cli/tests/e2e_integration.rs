//! End-to-end integration tests for calltrace.
//!
//! These tests wrap the real OpenAI-compatible client in the intercepting
//! proxy and point it at a one-shot local HTTP server, exercising the whole
//! path from the caller's keyword arguments to the recorded telemetry.

use std::sync::Arc;
use std::time::Duration;

use calltrace_config::{ProviderConfig, ProxySettings};
use calltrace_core::{ArgValue, Error, Kwargs, ProviderError};
use calltrace_proxy::{InterceptingProxy, RETURN_ID_KEY, Response, TAGS_KEY, Telemetry};
use calltrace_providers::OpenAiModule;
use calltrace_telemetry::InMemoryEmitter;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// ── Mock endpoint ────────────────────────────────────────────────────────

/// Serve exactly one HTTP response; the handle yields the raw request.
async fn serve_once(
    status: &'static str,
    content_type: &'static str,
    body: String,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{addr}/v1"), handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn sse(chunks: &[Value]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn chunk(role: Option<&str>, content: &str, finish: Option<&str>) -> Value {
    let mut delta = json!({ "content": content });
    if let Some(role) = role {
        delta["role"] = json!(role);
    }
    json!({
        "id": "chatcmpl-9",
        "object": "chat.completion.chunk",
        "model": "gpt-4o-mini",
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn create_proxy(base_url: &str, emitter: &Arc<InMemoryEmitter>) -> InterceptingProxy {
    let module = Arc::new(OpenAiModule::new(ProviderConfig {
        api_key: Some("sk-test".into()),
        base_url: base_url.into(),
        ..ProviderConfig::default()
    }));
    let telemetry = Arc::new(Telemetry::new(emitter.clone(), Some("pl-key".into())));
    let openai = InterceptingProxy::wrap(module, &ProxySettings::default(), telemetry);

    let client = openai
        .get("OpenAI")
        .unwrap()
        .into_proxy()
        .unwrap()
        .call(vec![], Kwargs::new())
        .unwrap()
        .into_instance()
        .unwrap();
    client.path_to(&["chat", "completions", "create"]).unwrap()
}

fn kwargs(pairs: Vec<(&str, ArgValue)>) -> Kwargs {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn messages() -> ArgValue {
    json!([{"role": "user", "content": "Hi"}]).into()
}

async fn settle(emitter: &InMemoryEmitter) {
    for _ in 0..200 {
        if emitter.count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_completion_is_tracked_with_an_id() {
    let completion = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}]
    });
    let (base_url, server) = serve_once("200 OK", "application/json", completion.to_string()).await;
    let emitter = Arc::new(InMemoryEmitter::with_correlation_id("req-1"));
    let create = create_proxy(&base_url, &emitter);

    let pending = create
        .call(
            vec![],
            kwargs(vec![
                ("messages", messages()),
                (TAGS_KEY, vec!["e2e".to_string()].into()),
                (RETURN_ID_KEY, true.into()),
            ]),
        )
        .unwrap()
        .into_pending()
        .expect("the client returns pending calls");

    let delivery = pending.await.unwrap().into_immediate().unwrap();
    assert_eq!(delivery.value(), &completion);
    assert_eq!(delivery.correlation_id(), Some("req-1"));

    // Reserved keys never reach the provider.
    let request = server.await.unwrap();
    assert!(request.starts_with("POST /v1/chat/completions"));
    assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
    assert!(request.contains("gpt-4o-mini"));
    assert!(!request.contains(TAGS_KEY));
    assert!(!request.contains(RETURN_ID_KEY));

    let record = emitter.last().unwrap();
    assert_eq!(emitter.count(), 1);
    assert_eq!(record.function_name, "openai.OpenAI.chat.completions.create");
    assert_eq!(record.tags, Some(vec!["e2e".to_string()]));
    assert_eq!(record.response, completion);
    assert_eq!(record.api_key, "pl-key");
    assert!(!record.kwargs.contains_key(TAGS_KEY));
}

#[tokio::test]
async fn e2e_stream_is_reassembled() {
    let body = sse(&[
        chunk(Some("assistant"), "Hel", None),
        chunk(None, "lo, ", None),
        chunk(None, "world", Some("stop")),
    ]);
    let (base_url, server) = serve_once("200 OK", "text/event-stream", body).await;
    let emitter = Arc::new(InMemoryEmitter::new());
    let create = create_proxy(&base_url, &emitter);

    let pending = create
        .call(
            vec![],
            kwargs(vec![("messages", messages()), ("stream", true.into())]),
        )
        .unwrap()
        .into_pending()
        .unwrap();
    let Response::Suspending(stream) = pending.await.unwrap() else {
        panic!("expected a suspending stream");
    };

    let deltas: Vec<String> = stream
        .map(|d| {
            let chunk = d.unwrap().into_inner();
            chunk["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
        .await;
    assert_eq!(deltas.concat(), "Hello, world");
    server.await.unwrap();

    settle(&emitter).await;
    assert_eq!(emitter.count(), 1);
    let response = emitter.last().unwrap().response;
    assert_eq!(
        response["choices"][0],
        json!({"role": "assistant", "content": "Hello, world"})
    );
    assert_eq!(response["id"], json!("chatcmpl-9"));
}

#[tokio::test]
async fn e2e_provider_errors_reach_the_caller_untracked() {
    let (base_url, server) = serve_once(
        "401 Unauthorized",
        "application/json",
        r#"{"error":{"message":"bad key"}}"#.to_string(),
    )
    .await;
    let emitter = Arc::new(InMemoryEmitter::new());
    let create = create_proxy(&base_url, &emitter);

    let pending = create
        .call(vec![], kwargs(vec![("messages", messages())]))
        .unwrap()
        .into_pending()
        .unwrap();
    let err = pending.await.unwrap_err();
    assert!(matches!(
        err,
        Error::Provider(ProviderError::AuthenticationFailed(_))
    ));
    server.await.unwrap();
    assert_eq!(emitter.count(), 0);
}
