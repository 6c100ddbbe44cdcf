//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Build the proxy's collaborators (resolver, credentials, egress) from it
//! - Start background tasks (credential reloader, metrics)
//! - Bind the listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::{load_config, ConfigError, ProxyConfig};
use crate::http::local_delegate;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::egress::EgressSelector;
use crate::observability::metrics;
use crate::proxy::ProxyOptions;
use crate::security::certs::{no_client_cert, CertKeyContentProvider, CertKeyError, FileCertKeyContent};
use crate::service::resolver;

/// Error type for startup failures.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("client certificate: {0}")]
    ClientCert(#[from] CertKeyError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// Load `path`, or use defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<ProxyConfig, StartupError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(ProxyConfig::default()),
    }
}

/// Load the client certificate and start reloading it in the background.
pub fn client_cert(config: &ProxyConfig, shutdown: &Shutdown) -> Result<Arc<dyn CertKeyContentProvider>, StartupError> {
    let Some(cert_config) = &config.client_cert else {
        tracing::info!("No client certificate configured, backends will not see one");
        return Ok(no_client_cert());
    };

    let content = Arc::new(FileCertKeyContent::new(
        "aggregator-proxy-client-cert",
        &cert_config.cert_path,
        &cert_config.key_path,
    )?);
    tokio::spawn(
        content
            .clone()
            .run(Duration::from_secs(cert_config.reload_interval_secs), shutdown.subscribe()),
    );
    tracing::info!(cert = %cert_config.cert_path, "Client certificate loaded");
    Ok(content)
}

/// Collaborators for every proxy handler, as configured.
pub fn proxy_options(config: &ProxyConfig, cert_key: Arc<dyn CertKeyContentProvider>) -> ProxyOptions {
    ProxyOptions::new(resolver::from_config(&config.resolver))
        .with_local_delegate(local_delegate())
        .with_cert_key(cert_key)
        .with_egress(EgressSelector::from_config(&config.egress))
        .with_request_timeout(Duration::from_secs(config.timeouts.proxy_request_secs))
}

/// Install the Prometheus exporter if enabled.
pub fn init_metrics(config: &ProxyConfig) -> Result<(), StartupError> {
    if !config.observability.metrics_enabled {
        return Ok(());
    }
    // Validation guarantees the address parses.
    match config.observability.metrics_address.parse::<SocketAddr>() {
        Ok(addr) => Ok(metrics::init_metrics(addr)?),
        Err(e) => {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            );
            Ok(())
        }
    }
}

pub async fn bind(config: &ProxyConfig) -> Result<TcpListener, StartupError> {
    let address = &config.listener.bind_address;
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })
}
