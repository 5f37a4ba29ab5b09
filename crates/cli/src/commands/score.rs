//! `calltrace score` and `calltrace track-score` — Attach a score to a call.

use calltrace_config::AppConfig;
use calltrace_telemetry::{RemoteTracker, SqlLogStore};
use std::ops::RangeInclusive;

const SCORE_RANGE: RangeInclusive<i64> = 0..=100;

fn check_score(score: i64) -> Result<(), String> {
    if SCORE_RANGE.contains(&score) {
        Ok(())
    } else {
        Err(format!(
            "Score must be between {} and {}, got {score}",
            SCORE_RANGE.start(),
            SCORE_RANGE.end()
        ))
    }
}

/// Update the `score` column of a logged response.
pub async fn run(response_id: String, score: i64) -> Result<(), Box<dyn std::error::Error>> {
    check_score(score)?;
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let store = SqlLogStore::from_config(&config.log_store)?
        .ok_or("Log store is disabled. Set log_store.path or CALLTRACE_LOG_DB")?;

    match store.score(&response_id, score)? {
        0 => println!("  ⚠️  No logged response with id {response_id}"),
        n => println!("  ✅ Scored {n} row(s) in `{}`", store.table()),
    }
    Ok(())
}

/// Post a score for a tracked request.
pub async fn track(
    request_id: String,
    score: i64,
    name: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    check_score(score)?;
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let api_key = config.require_api_key()?.to_string();
    let tracker = RemoteTracker::from_config(&config.tracking);

    let accepted = tokio::task::spawn_blocking(move || {
        tracker.track_score(&request_id, score, name.as_deref(), &api_key)
    })
    .await??;

    if accepted {
        println!("  ✅ Score recorded");
        Ok(())
    } else {
        Err("The tracking endpoint did not accept the score".into())
    }
}
