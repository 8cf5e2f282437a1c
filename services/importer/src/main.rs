//! Importer Service - Replaces the serving tables with a fresh snapshot
//!
//! Responsibilities:
//! - Load the country lookup table
//! - Import cases_time, derive cases_total, import cases_country
//! - Merge the wide recovered series into cases_time / cases_total
//! - Import country reference attributes
//!
//! At most one import may run against a database at a time; the caller
//! (scheduler or operator) is responsible for that.
//!
//! Usage:
//!   # Full import from the public feeds:
//!   cargo run --bin importer
//!
//!   # Retry selected stages:
//!   cargo run --bin importer -- --stage recovered --stage countries
//!
//!   # Replay a directory captured by the collector:
//!   cargo run --bin importer -- --from-dir ./data/raw

use anyhow::{Context, Result};
use clap::Parser;
use collector::{DirSource, FeedSource, HttpSource};
use importer::{Config, Importer, PgStore, RunReport, Stage, StageOutcome};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports case feeds into the serving tables")]
struct Args {
    /// Stage to run (repeatable; default: all stages)
    #[arg(long = "stage", value_enum)]
    stages: Vec<Stage>,

    /// Only import country reference attributes
    #[arg(long, default_value = "false", conflicts_with = "stages")]
    countries_only: bool,

    /// Read feeds from a directory captured by the collector instead of HTTP
    #[arg(long)]
    from_dir: Option<PathBuf>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log filter (e.g. "info", "importer=debug")
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn selected_stages(&self) -> Vec<Stage> {
        if self.countries_only {
            vec![Stage::Countries]
        } else if self.stages.is_empty() {
            Stage::ALL.to_vec()
        } else {
            self.stages.clone()
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}

async fn execute<F: FeedSource>(
    source: F,
    store: PgStore,
    config: &Config,
    stages: &[Stage],
) -> RunReport {
    Importer::new(source, store, config.catalog.clone())
        .run_stages(stages)
        .await
}

fn print_run_summary(report: &RunReport) {
    println!("\n=== Import Summary ===");
    println!("Run ID: {}", report.run_id);
    println!("Started: {}", report.started_at.to_rfc3339());
    println!("Duration: {:.1}s", report.elapsed.as_secs_f64());

    for (stage, outcome) in &report.stages {
        match outcome {
            StageOutcome::Done(feed) => println!(
                "  ✓ {:<14} {} rows ({} read, {} malformed, {} unresolved codes, {} unparsed dates, {} skipped)",
                stage.as_str(),
                feed.imported,
                feed.rows_read,
                feed.malformed,
                feed.unresolved_codes,
                feed.unparsed_dates,
                feed.skipped
            ),
            StageOutcome::Failed(message) => println!("  ✗ {:<14} {}", stage.as_str(), message),
            StageOutcome::Skipped => println!("  - {:<14} skipped", stage.as_str()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = Config::from_env().context("Failed to load configuration")?;
    let stages = args.selected_stages();

    let store = PgStore::connect(&config.db_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;

    let report = match &args.from_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "replaying captured feeds");
            execute(DirSource::new(dir), store, &config, &stages).await
        }
        None => {
            let source = HttpSource::new(config.http_timeout).context("Failed to build HTTP client")?;
            execute(source, store, &config, &stages).await
        }
    };

    print_run_summary(&report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "wrote run report");
    }

    if let Some((stage, message)) = report.failed_stage() {
        anyhow::bail!("stage '{}' failed: {}", stage, message);
    }

    Ok(())
}
