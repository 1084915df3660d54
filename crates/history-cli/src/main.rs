//! Composition root for the repository activity history engine.
//!
//! Wires the upstream batch client, the `SQLite`-backed snapshot store, and
//! the History Service facade together, then prints one repository's
//! timeline. Not a server: no HTTP router, no chart renderer (`spec.md` §1's
//! explicit non-goals) — those live in whatever consumes this binary's
//! output.

#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use history_core::{FetcherConfig, HistoryServiceConfig, LockConfig};
use history_db::pool::DbPoolConfig;
use history_service::HistoryService;
use history_upstream::UpstreamClient;
use tracing::error;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_possible_value() {
            Some(v) => f.write_str(v.get_name()),
            None => Ok(()),
        }
    }
}

/// Fetch and print the activity timeline for a single repository.
#[derive(Debug, Parser)]
#[command(name = "history-engine", about = "Repository activity history engine")]
struct Cli {
    /// Repository owner, e.g. "rust-lang".
    owner: String,

    /// Repository name, e.g. "rust".
    name: String,

    /// GraphQL upstream endpoint.
    #[arg(long, env = "UPSTREAM_ENDPOINT")]
    endpoint: String,

    /// Bearer token for the upstream API.
    #[arg(long, env = "UPSTREAM_TOKEN")]
    token: String,

    /// `SQLite` connection string, e.g. "sqlite://history.db".
    #[arg(long, env = "DB_URL", default_value = "sqlite://history.db")]
    db_url: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

fn print_table(timeline: &[history_core::Snapshot]) {
    println!("{:<12} {:>10} {:>10} {:>10} {:>10} {:>10}", "date", "issues+", "issues-", "prs+", "prs-", "prs merged");
    for s in timeline {
        let c = &s.counts;
        println!(
            "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10}",
            s.snapshot_date, c.issues_created_before, c.issues_closed_before, c.prs_created_before, c.prs_closed_before, c.prs_merged_before
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        error!(error = %e, "history-engine failed");
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: &Cli) -> history_core::Result<()> {
    let endpoint = reqwest::Url::parse(&cli.endpoint)
        .map_err(|e| history_core::Error::InvalidReference(format!("bad --endpoint: {e}")))?;

    let fetcher_config = FetcherConfig::from_env();
    let service_config = HistoryServiceConfig::from_env();
    let lock_config = LockConfig::from_env();

    let source = UpstreamClient::new(endpoint, &cli.token, fetcher_config.max_batch)?;

    let mut db_config = DbPoolConfig::new(cli.db_url.clone());
    db_config.run_migrations = true;
    let pool = history_db::pool::connect(&db_config)
        .await
        .map_err(history_core::Error::from)?;

    let service = HistoryService::new(pool, Arc::new(source), fetcher_config, service_config, lock_config);

    let timeline = service.get_timeline(&cli.owner, &cli.name).await?;

    match cli.format {
        OutputFormat::Table => print_table(&timeline),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&timeline)
                .map_err(|e| history_core::Error::Protocol(format!("failed to serialize timeline: {e}")))?;
            println!("{json}");
        }
    }

    Ok(())
}
