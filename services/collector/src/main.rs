//! Collector Service - Captures raw feed payloads to disk
//!
//! Responsibilities:
//! - Fetch the configured public feeds (CSV and JSON)
//! - Store each payload under its feed file name
//! - Record a manifest with content hashes for auditing
//!
//! A captured directory can be replayed by the importer with `--from-dir`.
//!
//! Usage:
//!   # All feeds:
//!   cargo run --bin collector -- --out ./data/raw
//!
//!   # Selected feeds:
//!   cargo run --bin collector -- --feed cases_time --feed lookup_table

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use collector::{http_timeout_from_vars, Feed, FeedCatalog, FeedFormat, HttpSource};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Captures raw feed payloads to disk")]
struct Args {
    /// Feed name to capture (repeatable; default: all feeds)
    #[arg(long = "feed")]
    feeds: Vec<String>,

    /// Output directory
    #[arg(long, default_value = "./data/raw")]
    out: PathBuf,

    /// List configured feeds and exit
    #[arg(long, default_value = "false")]
    list: bool,

    /// Log filter (e.g. "info", "collector=debug")
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone)]
struct Config {
    catalog: FeedCatalog,
    http_timeout: Duration,
}

impl Config {
    fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            catalog: FeedCatalog::from_vars(&var),
            http_timeout: http_timeout_from_vars(&var),
        }
    }
}

#[derive(Debug, Serialize)]
struct CapturedFeed {
    name: String,
    url: String,
    format: FeedFormat,
    captured_at: DateTime<Utc>,
    content_hash: String,
    size_bytes: usize,
    path: String,
}

/// Save payload under the feed's file name
async fn save_to_fs(dir: &Path, feed: &Feed, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(&feed.file_name);
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

async fn capture(source: &HttpSource, dir: &Path, feed: &Feed) -> Result<CapturedFeed> {
    let bytes = source.fetch_bytes(feed).await?;
    let hash = content_hash(&bytes);
    let path = save_to_fs(dir, feed, &bytes).await?;

    info!(feed = %feed.name, size = bytes.len(), hash = %hash, path = %path.display(), "captured");

    Ok(CapturedFeed {
        name: feed.name.clone(),
        url: feed.url.clone(),
        format: feed.format,
        captured_at: Utc::now(),
        content_hash: hash,
        size_bytes: bytes.len(),
        path: path.to_string_lossy().to_string(),
    })
}

fn print_feeds_summary(catalog: &FeedCatalog) {
    println!("\nConfigured feeds:");
    println!("{:-<60}", "");
    for feed in catalog.all() {
        println!("  {:<40} [{:?}]", feed.name, feed.format);
        println!("      {}", feed.url);
    }
    println!("{:-<60}", "");
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

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level)?;
    let config = Config::from_env();

    if args.list {
        print_feeds_summary(&config.catalog);
        return Ok(());
    }

    let feeds: Vec<Feed> = if args.feeds.is_empty() {
        config.catalog.all()
    } else {
        args.feeds
            .iter()
            .map(|name| {
                config
                    .catalog
                    .by_name(name)
                    .with_context(|| format!("Unknown feed '{}'", name))
            })
            .collect::<Result<_>>()?
    };

    let source = HttpSource::new(config.http_timeout).context("Failed to build HTTP client")?;

    info!(feeds = feeds.len(), out = %args.out.display(), "capturing feeds");

    let mut captured = Vec::new();
    let mut failed = 0;

    for feed in &feeds {
        match capture(&source, &args.out, feed).await {
            Ok(entry) => captured.push(entry),
            Err(e) => {
                error!(feed = %feed.name, error = %e, "capture failed");
                failed += 1;
            }
        }
    }

    let manifest_path = args.out.join("manifest.json");
    fs::create_dir_all(&args.out).await?;
    fs::write(&manifest_path, serde_json::to_vec_pretty(&captured)?)
        .await
        .context("Failed to write manifest")?;

    info!(
        captured = captured.len(),
        failed,
        manifest = %manifest_path.display(),
        "capture finished"
    );

    if failed > 0 {
        anyhow::bail!("{} feed(s) failed to download", failed);
    }

    Ok(())
}
