//! `calltrace chat` — One chat completion call through the intercepting proxy.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use calltrace_config::AppConfig;
use calltrace_core::{Kwargs, TelemetryEmitter};
use calltrace_proxy::{Intercepted, InterceptingProxy, RETURN_ID_KEY, Response, TAGS_KEY, Telemetry};
use calltrace_providers::OpenAiModule;
use calltrace_telemetry::{AnalyticsEmitter, InMemoryEmitter};
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::debug;

/// Correlation id handed out by the dry-run recorder.
const DRY_RUN_ID: &str = "dry-run";

#[derive(clap::Args)]
pub struct ChatArgs {
    /// The user message
    #[arg(short, long)]
    pub message: String,

    /// Override the model
    #[arg(long)]
    pub model: Option<String>,

    /// Stream the response
    #[arg(long)]
    pub stream: bool,

    /// Tag the tracked request (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Print the tracking request id
    #[arg(long)]
    pub return_id: bool,

    /// Record telemetry in memory and print it instead of sending it
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let recorder = args
        .dry_run
        .then(|| Arc::new(InMemoryEmitter::with_correlation_id(DRY_RUN_ID)));

    let (emitter, api_key) = match &recorder {
        Some(recorder) => {
            let emitter: Arc<dyn TelemetryEmitter> = recorder.clone();
            let key = config.api_key.clone().unwrap_or_else(|| DRY_RUN_ID.into());
            (emitter, key)
        }
        None => {
            let key = config.require_api_key()?.to_string();
            let emitter: Arc<dyn TelemetryEmitter> =
                Arc::new(AnalyticsEmitter::from_config(&config)?);
            (emitter, key)
        }
    };

    let telemetry = Arc::new(Telemetry::new(emitter, Some(api_key)));
    let module = Arc::new(OpenAiModule::new(config.provider.clone()));
    let openai = InterceptingProxy::wrap(module, &config.proxy, telemetry);

    let client = openai
        .get("OpenAI")?
        .into_proxy()
        .ok_or("`OpenAI` is not a class")?
        .call(vec![], Kwargs::new())?
        .into_instance()
        .ok_or("`OpenAI()` did not construct a client")?;
    let create = client.path_to(&["chat", "completions", "create"])?;

    let model = args
        .model
        .clone()
        .unwrap_or_else(|| config.provider.default_model.clone());
    let kwargs = build_kwargs(&args, &model);
    debug!(
        path = %create.path(),
        provider = %create.provider(),
        model = %model,
        stream = args.stream,
        "Calling"
    );

    let response = match create.call(vec![], kwargs)? {
        Intercepted::Pending(pending) => pending.await?,
        Intercepted::Ready(response) => response,
        Intercepted::Instance(_) => return Err("`create` constructed an instance".into()),
    };

    let correlation_id = print_response(response).await?;
    if args.return_id {
        match correlation_id {
            Some(id) => println!("request id: {id}"),
            None => println!("request id: (none)"),
        }
    }

    if let Some(recorder) = recorder {
        wait_for_records(&recorder, Duration::from_secs(2)).await;
        for record in recorder.records() {
            println!();
            println!("  Recorded: {}", record.function_name);
            println!("  Tags:     {:?}", record.tags.unwrap_or_default());
            println!("  Response: {}", serde_json::to_string_pretty(&record.response)?);
        }
    }

    Ok(())
}

/// Keyword arguments for `chat.completions.create`.
fn build_kwargs(args: &ChatArgs, model: &str) -> Kwargs {
    let mut kwargs = Kwargs::new();
    kwargs.insert("model".into(), model.into());
    kwargs.insert(
        "messages".into(),
        json!([{"role": "user", "content": args.message}]).into(),
    );
    if args.stream {
        kwargs.insert("stream".into(), true.into());
    }
    if !args.tags.is_empty() {
        kwargs.insert(TAGS_KEY.into(), args.tags.clone().into());
    }
    if args.return_id {
        kwargs.insert(RETURN_ID_KEY.into(), true.into());
    }
    kwargs
}

/// Print the response text, returning the correlation id if one arrived.
async fn print_response(
    response: Response,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    let mut correlation_id = None;

    match response {
        Response::Immediate(delivery) => {
            let (value, id) = delivery.into_parts();
            println!("{}", message_text(&value));
            correlation_id = id;
        }
        Response::Blocking(chunks) => {
            // The reassembler emits inline; keep that off the executor.
            correlation_id = tokio::task::block_in_place(
                || -> Result<Option<String>, Box<dyn std::error::Error>> {
                    let mut correlation_id = None;
                    for delivery in chunks {
                        let (chunk, id) = delivery?.into_parts();
                        write!(stdout, "{}", delta_text(&chunk))?;
                        stdout.flush()?;
                        correlation_id = correlation_id.or(id);
                    }
                    Ok(correlation_id)
                },
            )?;
            println!();
        }
        Response::Suspending(mut chunks) => {
            while let Some(delivery) = chunks.next().await {
                let (chunk, id) = delivery?.into_parts();
                write!(stdout, "{}", delta_text(&chunk))?;
                stdout.flush()?;
                correlation_id = correlation_id.or(id);
            }
            println!();
        }
    }

    Ok(correlation_id)
}

fn message_text(response: &Value) -> &str {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn delta_text(chunk: &Value) -> &str {
    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Detached emissions land shortly after the stream ends.
async fn wait_for_records(recorder: &InMemoryEmitter, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while recorder.count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
