//! Outbound transport: egress dial, TLS and one HTTP/1.1 exchange.
//!
//! Each request gets its own connection. The dial hook therefore runs once
//! per connection attempt, and the client certificate is resolved during
//! that connection's handshake.

use axum::body::Body;
use axum::http::{Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

use crate::net::egress::{BoxedStream, DirectDialer, EgressDialer};
use crate::net::tls::{crypto_provider, system_roots, LiveClientCert, SkipServerVerification};
use crate::observability::metrics;
use crate::proxy::error::ProxyError;
use crate::proxy::handling::TransportBuildError;
use crate::proxy::request::ProxyContext;
use crate::security::certs::CertKeyContentProvider;

/// How the backend's serving certificate is checked.
pub enum TlsPolicy {
    InsecureSkipVerify,
    /// Verify against `roots`, expecting `server_name` regardless of the
    /// address actually dialed.
    CaBundle {
        roots: RootCertStore,
        server_name: ServerName<'static>,
    },
    SystemDefault,
}

impl TlsPolicy {
    pub fn kind(&self) -> &'static str {
        match self {
            TlsPolicy::InsecureSkipVerify => "insecure",
            TlsPolicy::CaBundle { .. } => "ca_bundle",
            TlsPolicy::SystemDefault => "system",
        }
    }
}

pub struct ProxyTransport {
    connector: TlsConnector,
    policy: &'static str,
    server_name: Option<ServerName<'static>>,
    dialer: Option<Arc<dyn EgressDialer>>,
}

impl ProxyTransport {
    pub fn new(
        policy: TlsPolicy,
        cert_key: Arc<dyn CertKeyContentProvider>,
        dialer: Option<Arc<dyn EgressDialer>>,
    ) -> Result<Self, TransportBuildError> {
        let provider = crypto_provider();
        let kind = policy.kind();
        let client_cert = Arc::new(LiveClientCert::new(cert_key, provider.clone()));
        let builder = ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

        let (mut config, server_name) = match policy {
            TlsPolicy::InsecureSkipVerify => (
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(SkipServerVerification::new(provider))
                    .with_client_cert_resolver(client_cert),
                None,
            ),
            TlsPolicy::CaBundle { roots, server_name } => (
                builder
                    .with_root_certificates(roots)
                    .with_client_cert_resolver(client_cert),
                Some(server_name),
            ),
            TlsPolicy::SystemDefault => (
                builder
                    .with_root_certificates(system_roots())
                    .with_client_cert_resolver(client_cert),
                None,
            ),
        };
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            policy: kind,
            server_name,
            dialer,
        })
    }

    pub fn policy_kind(&self) -> &'static str {
        self.policy
    }

    /// Send `req` to `location` and wait for the response head.
    ///
    /// `req` must carry an absolute URI; it is rewritten to origin form
    /// before being written. The deadline bounds the dial, handshake and
    /// response head. Once the head is back, the response body and any
    /// upgrade it negotiates keep the connection alive until consumed.
    pub async fn round_trip(
        &self,
        location: &Url,
        req: Request<Body>,
        ctx: ProxyContext,
    ) -> Result<Response<Incoming>, ProxyError> {
        let deadline = ctx.deadline();
        let exchange = self.exchange(location, req, ctx.token().clone());

        let response = tokio::select! {
            biased;
            _ = ctx.inbound().cancelled() => Err(ProxyError::Canceled),
            _ = tokio::time::sleep_until(deadline) => Err(ProxyError::DeadlineExceeded),
            result = exchange => result.map_err(|e| settle(e, ctx.inbound(), deadline)),
        }?;

        ctx.detach();
        Ok(response)
    }

    async fn exchange(
        &self,
        location: &Url,
        mut req: Request<Body>,
        token: CancellationToken,
    ) -> Result<Response<Incoming>, ProxyError> {
        let host = location
            .host()
            .ok_or_else(|| ProxyError::InvalidLocation(location.to_string()))?;
        let port = location.port_or_known_default().unwrap_or(443);
        let address = format!("{host}:{port}");

        let server_name = match (&self.server_name, host) {
            (Some(name), _) => name.clone(),
            (None, Host::Domain(domain)) => {
                ServerName::try_from(domain.to_string()).map_err(|e| ProxyError::Tls {
                    address: address.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
                })?
            }
            (None, Host::Ipv4(ip)) => ServerName::from(IpAddr::V4(ip)),
            (None, Host::Ipv6(ip)) => ServerName::from(IpAddr::V6(ip)),
        };

        let stream = self.connect(&address, server_name).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

        // Runs until the body is consumed or dropped, the connection is
        // handed to an upgrade, or the exchange is cancelled.
        let conn_address = address.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = conn.with_upgrades() => {
                    if let Err(e) = result {
                        tracing::debug!(address = %conn_address, error = %e, "Backend connection ended with error");
                    }
                }
                _ = token.cancelled() => {
                    tracing::debug!(address = %conn_address, "Backend connection canceled");
                }
            }
        });

        *req.uri_mut() = origin_form(req.uri());
        sender.ready().await?;
        Ok(sender.send_request(req).await?)
    }

    async fn connect(&self, address: &str, server_name: ServerName<'static>) -> Result<TlsStream<BoxedStream>, ProxyError> {
        let dialed = match &self.dialer {
            Some(dialer) => {
                let result = dialer.dial("tcp", address).await;
                metrics::record_egress_dial(result.is_ok());
                result
            }
            None => DirectDialer.dial("tcp", address).await,
        };
        let stream = dialed.map_err(|source| ProxyError::Dial {
            address: address.to_string(),
            source,
        })?;

        self.connector
            .connect(server_name, stream)
            .await
            .map_err(|source| ProxyError::Tls {
                address: address.to_string(),
                source,
            })
    }
}

impl fmt::Debug for ProxyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTransport")
            .field("policy", &self.policy)
            .field("server_name", &self.server_name)
            .field("egress_dialer", &self.dialer.is_some())
            .finish()
    }
}

/// A failure observed after the deadline or after the inbound request went
/// away is reported as that, not as whatever the torn-down connection
/// produced.
fn settle(err: ProxyError, inbound: &CancellationToken, deadline: Instant) -> ProxyError {
    if Instant::now() >= deadline {
        ProxyError::DeadlineExceeded
    } else if inbound.is_cancelled() {
        ProxyError::Canceled
    } else {
        err
    }
}

fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .map(|pq| Uri::from(pq.clone()))
        .unwrap_or_else(|| Uri::from_static("/"))
}
