//! Client credential sources.
//!
//! The transport asks a [`CertKeyContentProvider`] for the current client
//! certificate and key on every TLS handshake. Nothing is cached on the
//! proxy side, so a rotated pair is used by the very next connection.

use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::net::tls::parse_cert_key;

/// Returns the current PEM-encoded client certificate chain and private key.
///
/// Implementations are called concurrently from many requests and must be
/// cheap and thread-safe. Empty bytes mean "no client certificate".
pub trait CertKeyContentProvider: Send + Sync {
    fn current_cert_key_content(&self) -> (Vec<u8>, Vec<u8>);
}

impl<F> CertKeyContentProvider for F
where
    F: Fn() -> (Vec<u8>, Vec<u8>) + Send + Sync,
{
    fn current_cert_key_content(&self) -> (Vec<u8>, Vec<u8>) {
        self()
    }
}

/// A provider that never presents a client certificate.
pub fn no_client_cert() -> Arc<dyn CertKeyContentProvider> {
    Arc::new(|| (Vec::new(), Vec::new()))
}

/// Error type for loading credential files.
#[derive(Debug, thiserror::Error)]
pub enum CertKeyError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid certificate/key pair: {0}")]
    Invalid(String),
}

#[derive(Debug, PartialEq, Eq)]
struct CertKeyPair {
    cert: Vec<u8>,
    key: Vec<u8>,
}

/// Cert/key content backed by files on disk.
///
/// [`run_once`](Self::run_once) re-reads both files and atomically swaps in
/// the new pair if it parses. A broken pair on disk never replaces a working
/// one.
#[derive(Debug)]
pub struct FileCertKeyContent {
    name: String,
    cert_path: PathBuf,
    key_path: PathBuf,
    content: ArcSwap<CertKeyPair>,
}

impl FileCertKeyContent {
    /// Load the initial pair. Fails if the files are missing or do not parse.
    pub fn new(
        name: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self, CertKeyError> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let pair = load_pair(&cert_path, &key_path)?;
        Ok(Self {
            name: name.into(),
            cert_path,
            key_path,
            content: ArcSwap::from_pointee(pair),
        })
    }

    /// Reload from disk. Returns whether the content changed.
    pub fn run_once(&self) -> Result<bool, CertKeyError> {
        let pair = load_pair(&self.cert_path, &self.key_path)?;
        if *self.content.load_full() == pair {
            return Ok(false);
        }
        self.content.store(Arc::new(pair));
        tracing::info!(name = %self.name, cert = ?self.cert_path, "Loaded new client certificate");
        Ok(true)
    }

    /// Reload periodically until shutdown is signalled.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once() {
                        tracing::error!(name = %self.name, error = %e, "Failed to reload client certificate, keeping current one");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(name = %self.name, "Client certificate reloader stopped");
                    return;
                }
            }
        }
    }
}

impl CertKeyContentProvider for FileCertKeyContent {
    fn current_cert_key_content(&self) -> (Vec<u8>, Vec<u8>) {
        let pair = self.content.load();
        (pair.cert.clone(), pair.key.clone())
    }
}

fn load_pair(cert_path: &Path, key_path: &Path) -> Result<CertKeyPair, CertKeyError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|source| CertKeyError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    let cert = read(cert_path)?;
    let key = read(key_path)?;
    parse_cert_key(&cert, &key).map_err(|e| CertKeyError::Invalid(e.to_string()))?;
    Ok(CertKeyPair { cert, key })
}
