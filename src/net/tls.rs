//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Parse PEM certificates, keys and CA bundles
//! - Provide the trust policies the proxy transport chooses between
//! - Resolve the client certificate live on every handshake
//! - Load the listener's serving certificate

use axum_server::tls_rustls::RustlsConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::security::certs::CertKeyContentProvider;

/// Error type for PEM parsing.
#[derive(Debug, thiserror::Error)]
pub enum PemError {
    #[error("malformed PEM: {0}")]
    Malformed(#[from] std::io::Error),
    #[error("no certificates found")]
    NoCertificates,
    #[error("no private key found")]
    NoPrivateKey,
    #[error("no usable trust anchors found")]
    NoTrustAnchors,
}

static PROVIDER: LazyLock<Arc<CryptoProvider>> =
    LazyLock::new(|| Arc::new(rustls::crypto::ring::default_provider()));

static SYSTEM_ROOTS: LazyLock<Arc<RootCertStore>> = LazyLock::new(|| {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        tracing::warn!(error = %e, "Failed to load a system root certificate");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    tracing::debug!(added, ignored, "Loaded system trust store");
    Arc::new(roots)
});

/// The crypto provider used for every outbound connection.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    PROVIDER.clone()
}

/// The platform's trust store, loaded once per process.
pub fn system_roots() -> Arc<RootCertStore> {
    SYSTEM_ROOTS.clone()
}

/// Parse every certificate in a PEM bundle.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, PemError> {
    let certs = rustls_pemfile::certs(&mut &pem[..]).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(PemError::NoCertificates);
    }
    Ok(certs)
}

/// Parse the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM document.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, PemError> {
    rustls_pemfile::private_key(&mut &pem[..])?.ok_or(PemError::NoPrivateKey)
}

/// Parse a certificate chain and its key.
pub fn parse_cert_key(
    cert: &[u8],
    key: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), PemError> {
    Ok((parse_certificates(cert)?, parse_private_key(key)?))
}

/// Build a trust store from a PEM CA bundle.
pub fn root_store_from_pem(pem: &[u8]) -> Result<RootCertStore, PemError> {
    let certs = parse_certificates(pem)?;
    let mut roots = RootCertStore::empty();
    let (added, _) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(PemError::NoTrustAnchors);
    }
    Ok(roots)
}

/// Accepts any server certificate. Handshake signatures are still checked so
/// the peer must hold the key for the certificate it presents.
#[derive(Debug)]
pub struct SkipServerVerification(Arc<CryptoProvider>);

impl SkipServerVerification {
    pub fn new(provider: Arc<CryptoProvider>) -> Arc<Self> {
        Arc::new(Self(provider))
    }
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Presents whatever client certificate the provider currently returns.
///
/// The provider is consulted on every handshake; nothing is cached here.
pub struct LiveClientCert {
    source: Arc<dyn CertKeyContentProvider>,
    provider: Arc<CryptoProvider>,
}

impl LiveClientCert {
    pub fn new(source: Arc<dyn CertKeyContentProvider>, provider: Arc<CryptoProvider>) -> Self {
        Self { source, provider }
    }

    fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        let (cert, key) = self.source.current_cert_key_content();
        if cert.is_empty() || key.is_empty() {
            return None;
        }
        let (chain, key) = match parse_cert_key(&cert, &key) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "Client certificate content is unusable, connecting without one");
                return None;
            }
        };
        match self.provider.key_provider.load_private_key(key) {
            Ok(signing_key) => Some(Arc::new(CertifiedKey::new(chain, signing_key))),
            Err(e) => {
                tracing::warn!(error = %e, "Unsupported client private key, connecting without one");
                None
            }
        }
    }
}

impl fmt::Debug for LiveClientCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveClientCert").finish()
    }
}

impl ResolvesClientCert for LiveClientCert {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.certified_key()
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Load the listener's TLS configuration from certificate and key files.
///
/// Only HTTP/1.1 is offered so upgrade requests can be relayed.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    let read = |path: &Path| {
        let path = path.to_path_buf();
        async move {
            tokio::fs::read(&path).await.map_err(|e| {
                std::io::Error::new(e.kind(), format!("failed to read {:?}: {}", path, e))
            })
        }
    };
    let cert = read(cert_path).await?;
    let key = read(key_path).await?;

    let invalid = |e: String| std::io::Error::new(std::io::ErrorKind::InvalidData, e);
    let (chain, key) = parse_cert_key(&cert, &key).map_err(|e| invalid(e.to_string()))?;
    let mut config = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| invalid(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| invalid(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(config)))
}
