//! CLI command definitions and dispatch.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::feeds::FeedCatalogue;
use crate::filter::KeywordTable;
use crate::metrics;
use crate::pipeline::{PipelineConfig, PipelineOrchestrator};
use crate::storage::Database;

/// threatforge: threat-intelligence feed ingestion and enrichment.
#[derive(Debug, Parser)]
#[command(name = "threatforge", version, about)]
pub struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one ingestion cycle and exit.
    Run {
        /// Feed catalogue file (overrides TF_FEEDS_PATH).
        #[arg(long)]
        feeds: Option<PathBuf>,
        /// Keyword table override file.
        #[arg(long)]
        keywords: Option<PathBuf>,
        /// Restrict the run to these source tags.
        #[arg(long)]
        tags: Vec<String>,
    },
    /// Run cycles on a fixed schedule until interrupted.
    Schedule {
        /// Seconds between cycle starts.
        #[arg(long, default_value_t = 900)]
        interval_s: u64,
        /// Feed catalogue file (overrides TF_FEEDS_PATH).
        #[arg(long)]
        feeds: Option<PathBuf>,
        /// Keyword table override file.
        #[arg(long)]
        keywords: Option<PathBuf>,
    },
    /// Apply schema migrations and exit.
    Migrate,
    /// Print current metrics in Prometheus text format.
    Metrics,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run {
            feeds,
            keywords,
            tags,
        } => {
            let orchestrator = build_orchestrator(feeds, keywords, &tags).await?;
            let report = orchestrator.run_cycle().await?;
            info!(
                fetched = report.fetched,
                matched = report.matched,
                raw_inserted = report.raw_inserted,
                alerts_saved = report.alerts_saved,
                duration_ms = report.duration_ms,
                "Run complete"
            );
            Ok(())
        }
        Command::Schedule {
            interval_s,
            feeds,
            keywords,
        } => {
            let orchestrator = Arc::new(build_orchestrator(feeds, keywords, &[]).await?);

            let handle = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received; finishing current cycle");
                    handle.shutdown();
                }
            });

            orchestrator
                .run_loop(Duration::from_secs(interval_s.max(1)))
                .await?;
            Ok(())
        }
        Command::Migrate => {
            let config = PipelineConfig::from_env()?;
            let database = Database::connect(&config.database_url).await?;
            database.run_migrations().await?;
            info!("Migrations applied");
            Ok(())
        }
        Command::Metrics => {
            print!("{}", metrics::export_metrics());
            Ok(())
        }
    }
}

/// Loads configuration and data files and wires the orchestrator.
async fn build_orchestrator(
    feeds: Option<PathBuf>,
    keywords: Option<PathBuf>,
    tags: &[String],
) -> anyhow::Result<PipelineOrchestrator> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(path) = feeds {
        config.feeds_path = path;
    }
    if let Some(path) = keywords {
        config.keywords_path = Some(path);
    }

    metrics::init_metrics()?;

    let catalogue = FeedCatalogue::from_yaml_file(&config.feeds_path)?.filtered(tags);
    let keyword_table = match &config.keywords_path {
        Some(path) => KeywordTable::from_yaml_file(path)?,
        None => KeywordTable::default(),
    };

    let database = Arc::new(Database::connect(&config.database_url).await?);
    database.run_migrations().await?;

    Ok(PipelineOrchestrator::new(
        config,
        catalogue,
        &keyword_table,
        database,
    )?)
}
