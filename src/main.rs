//! Media server HTTP endpoint.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                  ENDPOINT SERVER                      │
//!                       │                                                       │
//!   Client connection   │  ┌──────────┐   ┌───────────┐   ┌─────────────────┐  │
//!   ────────────────────┼─▶│   net    │──▶│   http    │──▶│    endpoint     │  │
//!                       │  │ acceptor │   │ head read │   │  bind_context   │  │
//!                       │  └────┬─────┘   └───────────┘   └────────┬────────┘  │
//!                       │       │ registry                         │ routing   │
//!                       │       ▼                                  ▼           │
//!                       │  ┌──────────┐                   ┌─────────────────┐  │
//!   404 / close         │  │unrouted  │                   │  virtual host   │  │
//!   ◀───────────────────┼──│connection│                   │  context queue  │──┼──▶ consumer
//!                       │  └──────────┘                   └─────────────────┘  │
//!                       │                                                       │
//!                       │   config + watcher · lifecycle · observability        │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use media_endpoint::config::loader::load_config;
use media_endpoint::config::watcher::ConfigWatcher;
use media_endpoint::lifecycle::signals;
use media_endpoint::lifecycle::{Server, Shutdown};
use media_endpoint::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "media-endpoint")]
#[command(about = "Socket-level HTTP endpoint listener for a media server", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "media-endpoint.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    if cli.check {
        println!("{}: configuration is valid", cli.config.display());
        return Ok(());
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "media-endpoint starting");
    tracing::info!(
        config = %cli.config.display(),
        bind_address = %config.server.bind_address,
        enable_dual_mode = config.server.enable_dual_mode,
        listeners = config.listeners.len(),
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

    let shutdown = Arc::new(Shutdown::new());
    let mut server = Server::start(&config, shutdown.clone()).await?;

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
    let _watch = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let signal = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { signals::trigger_on_signal(&shutdown).await })
    };

    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            Some(next) = updates.recv() => {
                server.apply(&next).await;
            }
        }
    }

    server.stop().await;
    signal.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
