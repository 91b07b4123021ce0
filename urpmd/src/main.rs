//! # urpmd
//!
//! The urpm daemon: keeps a local indexed view of remote package media,
//! pre-downloads pending upgrades while the host is idle, and serves its
//! RPM cache to LAN peers.
//!
//! ## Architecture
//!
//! One process, four cooperating components sharing the SQLite package
//! database (one handle per component):
//!
//! - a tick-driven scheduler with jittered, quantized task timing
//! - a freshness prober that HEADs upstream synthesis indexes
//! - a pre-download engine gated on host idleness
//! - an axum surface answering availability, `have`, and peer queries

pub mod config;
pub mod daemon;
#[cfg(unix)]
pub mod daemonize;
pub mod discovery;
pub mod errors;
pub mod handlers;
pub mod predownload;
pub mod routes;
pub mod scheduler;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::DaemonConfig;
use crate::daemon::{Daemon, DaemonBuilder};

/// Command line arguments for the urpm daemon
#[derive(Parser, Debug)]
#[command(name = "urpmd")]
#[command(about = "urpm daemon for intelligent package cache management")]
struct Args {
    /// Run in foreground (do not daemonize)
    #[arg(short = 'f', long)]
    foreground: bool,

    /// HTTP port (defaults per mode)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// HTTP listen address
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Development mode: foreground + verbose + user paths + all interfaces
    #[arg(long)]
    dev: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::resolve(args.dev, args.foreground, args.verbose, args.host, args.port);

    // The log file and PID file need their directories before the fork.
    config
        .ensure_directories()
        .context("could not create daemon directories")?;

    if !config.foreground {
        #[cfg(unix)]
        daemonize::daemonize(&config.pid_file)?;
        #[cfg(not(unix))]
        anyhow::bail!("detached mode is only supported on unix; use --foreground");
    }

    init_tracing(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not start async runtime")?;
    runtime.block_on(run(config))
}

/// Foreground runs log to stderr; detached runs append to a log file under
/// the base directory (stdio points at /dev/null by then).
fn init_tracing(config: &DaemonConfig) -> anyhow::Result<()> {
    let default_filter = if config.verbose {
        "urpmd=debug,urpm_core=debug,tower_http=debug"
    } else {
        "urpmd=info,urpm_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if config.foreground {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.log_file())
            .with_context(|| format!("could not open log file {}", config.log_file().display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
            .init();
    }
    Ok(())
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let (daemon, scheduler) = DaemonBuilder::new(config)
        .build()
        .await
        .context("daemon initialization failed")?;
    daemon.start_background(scheduler);

    let app = routes::create_app(Arc::clone(&daemon));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!("urpmd started successfully on {}", addr);

    spawn_signal_handlers(Arc::clone(&daemon));

    let mut shutdown = daemon.shutdown_watch();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("request server failed")?;

    daemon.finish_shutdown().await;
    Ok(())
}

/// SIGTERM/SIGINT flip the shutdown flag; SIGHUP forces a refresh of all
/// enabled media. Handlers only set flags or spawn; no work happens inline.
#[cfg(unix)]
fn spawn_signal_handlers(daemon: Arc<Daemon>) {
    use tokio::signal::unix::{signal, SignalKind};

    let term_daemon = Arc::clone(&daemon);
    tokio::spawn(async move {
        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            error!("could not install SIGTERM handler");
            return;
        };
        let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
            error!("could not install SIGINT handler");
            return;
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        term_daemon.begin_shutdown();
    });

    tokio::spawn(async move {
        let Ok(mut sighup) = signal(SignalKind::hangup()) else {
            error!("could not install SIGHUP handler");
            return;
        };
        while sighup.recv().await.is_some() {
            info!("received SIGHUP, refreshing all media");
            let refresh_daemon = Arc::clone(&daemon);
            tokio::spawn(async move {
                if let Err(e) = refresh_daemon.refresh_metadata(None, true).await {
                    error!("forced refresh failed: {}", e);
                }
            });
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_handlers(_daemon: Arc<Daemon>) {}
