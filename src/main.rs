//! AILERON Gateway
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────▶ request-id ─▶ trace ─▶ timeout ─▶ session ─▶ compression ─▶ proxy ─▶ Upstream
//!     ◀────── Set-Cookie, Content-Encoding applied on the way back ◀──────────────
//!
//!     Background:
//!         cron job ─▶ RotatingFile::swap_file ─▶ gzip archive ─▶ retention
//!         config watcher / SIGHUP ─▶ upstream swap
//!         SIGINT / SIGTERM ─▶ Shutdown ─▶ drain server, stop jobs, close log file
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use aileron_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use aileron_gateway::cron::CronJob;
use aileron_gateway::http::HttpServer;
use aileron_gateway::lifecycle::{wait_for_signal, Shutdown, SignalEvent};
use aileron_gateway::logfile::{self, RotatingFile, RotatingFileOptions};
use aileron_gateway::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "aileron-gateway", version, about = "HTTP gateway with sessions, compression and log rotation")]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    let log_file = match &config.log_file {
        Some(log_config) => Some(Arc::new(RotatingFile::new(RotatingFileOptions::from_config(log_config))?)),
        None => None,
    };
    logging::init(&config.observability, log_file.clone())?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "aileron-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        compression = config.compression.enabled,
        session = config.session.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let rotation: Option<CronJob> = match (&log_file, config.log_file.as_ref().and_then(|c| c.cron.as_deref())) {
        (Some(file), Some(expr)) if !expr.trim().is_empty() => {
            let job = logfile::rotation_job(expr, file.clone())?;
            job.start();
            tracing::info!(cron = %expr, "Log rotation job started");
            Some(job)
        }
        _ => None,
    };

    let shutdown = Shutdown::new();

    let (watcher, updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher), Some(updates))
        }
        None => (None, None),
    };
    let _watch_guard = match watcher.as_ref().map(ConfigWatcher::run) {
        Some(Ok(guard)) => Some(guard),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
        None => None,
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                match wait_for_signal().await {
                    SignalEvent::Shutdown => {
                        shutdown.trigger();
                        break;
                    }
                    SignalEvent::Reload => match &watcher {
                        Some(watcher) => {
                            watcher.reload();
                        }
                        None => tracing::info!("No config file to reload"),
                    },
                }
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config)?;
    server.run(listener, shutdown, updates).await?;

    if let Some(job) = rotation {
        job.stop();
    }
    if let Some(file) = log_file {
        file.close()?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
