//! Handling snapshots and the snapshot builder.
//!
//! A [`HandlingInfo`] is everything needed to proxy one request for one
//! registration. It is built from scratch on every registration update and
//! published by swapping a pointer; a published snapshot is never mutated.

use rustls::pki_types::ServerName;
use std::sync::Arc;

use crate::apiservice::ApiService;
use crate::net::egress::EgressDialer;
use crate::net::tls::root_store_from_pem;
use crate::proxy::transport::{ProxyTransport, TlsPolicy};
use crate::security::certs::CertKeyContentProvider;

/// Why a snapshot's transport could not be built. Stored in the snapshot
/// and reported per request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportBuildError {
    #[error("invalid CA bundle: {0}")]
    InvalidCaBundle(String),
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    #[error("tls configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// Published state for one registration.
#[derive(Debug)]
pub enum HandlingInfo {
    /// The group/version is served by the local delegate.
    Local,
    Proxy(ProxyHandlingInfo),
}

#[derive(Debug)]
pub struct ProxyHandlingInfo {
    /// Registration name, for logs and metrics.
    pub name: String,
    pub available: bool,
    pub service_name: String,
    pub service_namespace: String,
    pub service_port: u16,
    /// Transport bound to the registration's trust policy, or the deferred
    /// reason it could not be built.
    pub transport: Result<ProxyTransport, TransportBuildError>,
}

/// Build a snapshot for `api_service`. Performs no network I/O.
pub fn build_handling_info(
    api_service: &ApiService,
    cert_key: &Arc<dyn CertKeyContentProvider>,
    egress_dialer: Option<Arc<dyn EgressDialer>>,
) -> HandlingInfo {
    let Some(service) = &api_service.spec.service else {
        return HandlingInfo::Local;
    };

    let transport = select_tls_policy(api_service)
        .and_then(|policy| ProxyTransport::new(policy, cert_key.clone(), egress_dialer));

    if let Err(e) = &transport {
        tracing::error!(
            api_service = %api_service.name,
            error = %e,
            "Failed to build proxy transport, requests will be rejected until the registration changes"
        );
    }

    HandlingInfo::Proxy(ProxyHandlingInfo {
        name: api_service.name.clone(),
        available: api_service.is_available(),
        service_name: service.name.clone(),
        service_namespace: service.namespace.clone(),
        service_port: service.port,
        transport,
    })
}

/// Pick the trust policy: explicit opt-out first, then the CA bundle, then
/// the system trust store.
fn select_tls_policy(api_service: &ApiService) -> Result<TlsPolicy, TransportBuildError> {
    let spec = &api_service.spec;

    if spec.insecure_skip_tls_verify {
        tracing::warn!(
            api_service = %api_service.name,
            "Backend serving certificate will not be verified (insecure_skip_tls_verify)"
        );
        return Ok(TlsPolicy::InsecureSkipVerify);
    }

    let ca_bundle = spec.ca_bundle.as_deref().map(str::trim).unwrap_or_default();
    if ca_bundle.is_empty() {
        return Ok(TlsPolicy::SystemDefault);
    }

    let roots = root_store_from_pem(ca_bundle.as_bytes())
        .map_err(|e| TransportBuildError::InvalidCaBundle(e.to_string()))?;
    let service = spec.service.as_ref();
    let host = format!(
        "{}.{}.svc",
        service.map(|s| s.name.as_str()).unwrap_or_default(),
        service.map(|s| s.namespace.as_str()).unwrap_or_default(),
    );
    let server_name =
        ServerName::try_from(host.clone()).map_err(|_| TransportBuildError::InvalidServerName(host))?;

    Ok(TlsPolicy::CaBundle { roots, server_name })
}
