//! calltrace CLI — the main entry point.
//!
//! Commands:
//! - `chat`        — Make one intercepted chat completion call
//! - `score`       — Score a response in the log store
//! - `track-score` — Send a score to the tracking endpoint
//! - `config`      — Show the effective configuration
//! - `doctor`      — Diagnose credentials and sinks

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "calltrace",
    about = "calltrace — record LLM client calls to an analytics backend",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Make one chat completion call through the intercepting proxy
    Chat(commands::chat::ChatArgs),

    /// Set the score of a logged response
    Score {
        /// The provider's response id (`response_id` column)
        #[arg(long)]
        response_id: String,

        /// Score between 0 and 100
        #[arg(long)]
        score: i64,
    },

    /// Send a score for a tracked request to the tracking endpoint
    TrackScore {
        /// The request id returned by `chat --return-id`
        #[arg(long)]
        request_id: String,

        /// Score between 0 and 100
        #[arg(long)]
        score: i64,

        /// Optional score name
        #[arg(long)]
        name: Option<String>,
    },

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print the default configuration file instead
        #[arg(long)]
        default: bool,
    },

    /// Diagnose credentials, tracking endpoint and log store
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat(args) => commands::chat::run(args).await?,
        Commands::Score { response_id, score } => {
            commands::score::run(response_id, score).await?
        }
        Commands::TrackScore {
            request_id,
            score,
            name,
        } => commands::score::track(request_id, score, name).await?,
        Commands::Config { default } => commands::config_cmd::run(default).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_flags() {
        let cli = Cli::try_parse_from([
            "calltrace", "chat", "-m", "Hi", "--stream", "--tag", "a", "--tag", "b", "--return-id",
        ])
        .unwrap();
        let Commands::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(args.message, "Hi");
        assert!(args.stream);
        assert!(args.return_id);
        assert!(!args.dry_run);
        assert_eq!(args.tags, vec!["a", "b"]);
    }

    #[test]
    fn parses_track_score() {
        let cli = Cli::try_parse_from([
            "calltrace", "track-score", "--request-id", "42", "--score", "90", "--name", "quality",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::TrackScore { score: 90, name: Some(_), .. }
        ));
    }

    #[test]
    fn chat_requires_a_message() {
        assert!(Cli::try_parse_from(["calltrace", "chat"]).is_err());
    }
}
