//! Aggregator proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http (TLS listener, Audit-ID, authn, RequestContext)
//!                         │
//!                         ▼
//!                     routing (/apis/<group>/<version> → ProxyHandler)
//!                         │                         │
//!                   local delegate            proxy dispatcher
//!                   (/healthz, 404)           (snapshot gates)
//!                                                   │
//!                                                   ▼
//!                                service resolver → egress dial → TLS
//!                                                   │
//!     Client Response ◀─────────── relayed response or upgrade tunnel ◀── Backend
//!
//!     Cross-cutting: config (+ watcher), observability, lifecycle
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;

use aggregator_proxy::config::ConfigWatcher;
use aggregator_proxy::lifecycle::{signals, startup, Shutdown};
use aggregator_proxy::observability::logging;
use aggregator_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "aggregator-proxy")]
#[command(about = "Proxies registered API groups to their backing services", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Watched for registration changes.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = startup::load(cli.config.as_deref())?;
    logging::init_logging(Some(&config.observability.log_level));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "aggregator-proxy starting");
    if cli.config.is_none() {
        tracing::warn!("No configuration file given, using defaults");
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        api_services = config.api_services.len(),
        proxy_request_secs = config.timeouts.proxy_request_secs,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    startup::init_metrics(&config)?;
    let cert_key = startup::client_cert(&config, &shutdown)?;
    let options = startup::proxy_options(&config, cert_key);

    // The watcher must stay alive for updates to keep flowing.
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, &config);
            (Some(watcher.run().map_err(startup::StartupError::from)?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = startup::bind(&config).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, options);
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    shutdown.trigger();
    tracing::info!("Shutdown complete");
    Ok(())
}
