use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use album_sync::clock::Clock;
use album_sync::config;
use album_sync::server::{build_app, AppState};
use album_sync::sweep;

#[derive(Debug, Parser)]
#[command(author, version, about = "Sync Shopify album fulfillments to the Hanteo chart API")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    // Periodic recent-order sweep, running next to the HTTP surface.
    let sweep_pipeline = Arc::clone(&pipeline);
    let interval = Duration::from_secs(cfg.app.sweep_interval_secs);
    let hours_ago = cfg.app.sweep_hours_ago;
    let limit = cfg.app.sweep_limit;
    tokio::spawn(async move {
        loop {
            match sweep_pipeline.sweep_recent(hours_ago, limit).await {
                Ok(report) => {
                    info!(
                        orders = report.orders_seen,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "periodic sweep finished"
                    );
                }
                Err(err) => {
                    error!(?err, "periodic sweep failed");
                }
            }
            tokio::time::sleep(interval).await;
        }
    });

    let state = AppState {
        pipeline,
        webhook_secret: Arc::new(cfg.shopify.webhook_secret.clone()),
        sweep_hours_ago: cfg.app.sweep_hours_ago,
        sweep_limit: cfg.app.sweep_limit,
        started_at: Instant::now(),
    };
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.bind_addr))?;
    info!(addr = %cfg.app.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("received shutdown signal, starting graceful shutdown");
}
