//! logcarrier - log-shipping server
//!
//! Accepts framed log streams over TCP, appends them into per-destination
//! files (optionally zstd-compressed) and rotates those files atomically on
//! client command or on a schedule.
//!
//! Usage:
//!   logcarrier                  Run with /usr/local/etc/logcarrier.yaml
//!   logcarrier -c path.yaml     Run with an explicit config
//!   logcarrier -v               Verbose (debug-level) logging

mod bufferer;
mod cli;
mod config;
mod constants;
mod error;
mod fileio;
mod notify;
mod paths;
mod protocol;
mod registry;
mod schedule;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::info;

use crate::server::Carrier;

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let config = config::load(&args.config)?;
    init_tracing(args.verbose, config.log_file.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: config::Config) -> Result<()> {
    let carrier = Carrier::start(config).await?;
    let shutdown = carrier.shutdown_handle();

    wait_for_stop(&shutdown).await?;

    carrier.stop().await;
    Ok(())
}

/// Blocks until a termination signal arrives or an io-fatal path requested
/// shutdown internally
#[cfg(unix)]
async fn wait_for_stop(shutdown: &server::Shutdown) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = shutdown.requested() => info!("shutdown requested internally"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_stop(shutdown: &server::Shutdown) -> Result<()> {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = shutdown.requested() => info!("shutdown requested internally"),
    }
    Ok(())
}

/// Routes the process log to stderr or the configured log file
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::new(level);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let _ = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .with(filter)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .compact(),
                )
                .with(filter)
                .try_init();
        }
    }
    Ok(())
}
