//! `calltrace config` — Show the effective configuration.

use calltrace_config::AppConfig;

pub async fn run(default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", config_path().display());
    println!("{config:#?}");
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = config_path();
        assert!(path.to_str().unwrap().contains(".calltrace"));
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn effective_config_is_redacted() {
        let config = AppConfig {
            api_key: Some("pl-secret".into()),
            ..AppConfig::default()
        };
        let shown = format!("{config:#?}");
        assert!(!shown.contains("pl-secret"));
        assert!(shown.contains("[REDACTED]"));
    }
}
