//! Holocron Ingest - bounded-concurrency record ingestion tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use holocron_common::logging::{init_logging, LogConfig, LogLevel};
use holocron_ingest::{IngestConfig, IngestPipeline, RecordStore, RunState, SqliteStore};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "holocron-ingest")]
#[command(author, version, about = "Fetch, normalize and store records from an ID-addressable API")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a range of identifiers
    Run(RunArgs),

    /// Print one stored record as JSON
    Show {
        /// Record identifier
        id: i64,

        /// Database URL (overrides DATABASE_URL)
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// First identifier (inclusive)
    #[arg(long)]
    start: Option<i64>,

    /// Last identifier (exclusive)
    #[arg(long)]
    end: Option<i64>,

    /// Maximum simultaneous fetches
    #[arg(short, long)]
    concurrency: Option<NonZeroUsize>,

    /// Per-fetch timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Retries per identifier after a transport error
    #[arg(long)]
    retries: Option<u32>,

    /// Source endpoint, records are fetched from <BASE_URL>/<id>
    #[arg(long)]
    base_url: Option<String>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Delete previously stored records before ingesting
    #[arg(long)]
    reset: bool,
}

impl RunArgs {
    fn apply(self, mut config: IngestConfig) -> Result<IngestConfig> {
        if let Some(start) = self.start {
            config.source.start_id = start;
        }
        if let Some(end) = self.end {
            config.source.end_id = end;
        }
        if let Some(cap) = self.concurrency {
            config.source.concurrency_cap = cap;
        }
        if let Some(secs) = self.timeout_secs {
            config.source.fetch_timeout_secs = Some(secs);
        }
        if let Some(retries) = self.retries {
            config.source.fetch_retries = retries;
        }
        if let Some(url) = self.base_url {
            config.source.base_url = url;
        }
        if let Some(url) = self.database_url {
            config.database.url = url;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("holocron-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = IngestConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Run(args) => {
            let reset = args.reset;
            run(args.apply(config)?, reset).await
        },
        Command::Show { id, database_url } => {
            let mut config = config;
            if let Some(url) = database_url {
                config.database.url = url;
            }
            config.database.validate()?;
            show(&config, id).await
        },
    }
}

async fn run(config: IngestConfig, reset: bool) -> Result<()> {
    let store = Arc::new(
        SqliteStore::connect(&config.database)
            .await
            .context("Failed to open record store")?,
    );

    if reset {
        store.reset().await.context("Failed to clear stored records")?;
    }

    let pipeline = IngestPipeline::from_config(&config, store.clone())
        .context("Failed to build HTTP client")?;

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing outstanding loads before exit");
            token.cancel();
        }
    });

    let report = pipeline.run(config.source.id_range()).await;
    info!("{}", report.summary());

    store.close().await;

    if report.state == RunState::Aborted && !report.cancelled {
        anyhow::bail!(
            "Ingestion aborted after {} of {} batches failed",
            report.batch_failures.len(),
            report.chunks_dispatched
        );
    }

    Ok(())
}

async fn show(config: &IngestConfig, id: i64) -> Result<()> {
    let store = SqliteStore::connect(&config.database)
        .await
        .context("Failed to open record store")?;

    let record = store.get(id).await?;
    store.close().await;

    match record {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        },
        None => anyhow::bail!("No stored record with id {id}"),
    }
}
