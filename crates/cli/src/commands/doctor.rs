//! `calltrace doctor` — Diagnose credentials and sinks.

use calltrace_config::AppConfig;
use calltrace_telemetry::SqlLogStore;

/// Columns `calltrace score` needs.
const SCORE_COLUMNS: [&str; 2] = ["response_id", "score"];

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 calltrace Doctor — Diagnostics");
    println!("================================\n");

    let mut issues = 0;

    // Check config
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Err(e.into());
        }
    };

    // Check analytics credential
    match config.require_api_key() {
        Ok(_) => println!("  ✅ Analytics API key configured"),
        Err(e) => {
            println!("  ⚠️  {e}");
            issues += 1;
        }
    }

    // Check provider credential
    if config.provider.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
        println!("  ✅ Provider API key configured");
    } else {
        println!("  ⚠️  No provider API key — set OPENAI_API_KEY");
        issues += 1;
    }

    // Check tracking endpoint
    if config.tracking.enabled {
        println!("  ✅ Tracking endpoint: {}", config.tracking.base_url);
    } else {
        println!("  ⚠️  Remote tracking disabled");
    }

    // Check log store
    match SqlLogStore::from_config(&config.log_store) {
        Ok(None) => println!("  ➖ Log store disabled"),
        Ok(Some(store)) => match store.columns() {
            Ok(columns) => {
                println!("  ✅ Log table `{}` has {} columns", store.table(), columns.len());
                let missing: Vec<&str> = SCORE_COLUMNS
                    .into_iter()
                    .filter(|c| !columns.contains(*c))
                    .collect();
                if !missing.is_empty() {
                    println!("  ⚠️  `score` needs columns: {}", missing.join(", "));
                    issues += 1;
                }
            }
            Err(e) => {
                println!("  ❌ {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
