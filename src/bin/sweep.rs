use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use album_sync::clock::Clock;
use album_sync::config;
use album_sync::sweep;

#[derive(Debug, Parser)]
#[command(author, version, about = "Run one recent-order sweep and exit")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Update-time window to sweep, in hours
    #[arg(long, default_value = "24")]
    hours_ago: i64,

    /// Order page size / per-sweep ceiling
    #[arg(long, default_value = "250")]
    limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pipeline = sweep::build_pipeline(&cfg, Clock::system())?;

    let report = pipeline.sweep_recent(args.hours_ago, args.limit).await?;
    info!(
        orders = report.orders_seen,
        skipped = report.orders_skipped,
        transactions = report.transactions,
        succeeded = report.succeeded,
        failed = report.failed,
        "sweep complete"
    );
    Ok(())
}
