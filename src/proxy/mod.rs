//! Aggregation proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Registration update
//!     → handling.rs (build immutable HandlingInfo, pick TLS policy)
//!     → handler.rs (atomic pointer swap)
//!
//! Inbound request
//!     → handler.rs (load snapshot, gates: available, user, resolve, transport)
//!     → request.rs (target URL, forwarding headers, audit ID, deadline)
//!     → transport.rs (egress dial → TLS → HTTP/1.1 exchange)
//!     → upgrade.rs (101 → bidirectional relay) or streamed response
//! ```
//!
//! # Design Decisions
//! - Snapshots are rebuilt whole on every update and never mutated
//! - Transport build failures are stored in the snapshot, reported per request
//! - One resolution and one connection attempt per request, no retries
//! - Every failure maps to a status code; nothing escapes as a panic

pub mod error;
pub mod handler;
pub mod handling;
pub mod request;
pub mod transport;
pub mod upgrade;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use crate::net::connection::TunnelTracker;
use crate::net::egress::EgressSelector;
use crate::security::certs::{no_client_cert, CertKeyContentProvider};
use crate::service::ServiceResolver;

pub use error::ProxyError;
pub use handler::ProxyHandler;
pub use handling::{build_handling_info, HandlingInfo, ProxyHandlingInfo, TransportBuildError};
pub use request::{new_request_for_proxy, ProxyContext};

/// Default bound on one proxied exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Collaborators shared by every [`ProxyHandler`].
#[derive(Clone)]
pub struct ProxyOptions {
    /// Serves group/versions that are not proxied. Unmatched paths get 404.
    pub local_delegate: Router,
    pub service_resolver: Arc<dyn ServiceResolver>,
    pub cert_key: Arc<dyn CertKeyContentProvider>,
    pub egress: EgressSelector,
    pub request_timeout: Duration,
    pub tunnels: TunnelTracker,
}

impl ProxyOptions {
    pub fn new(service_resolver: Arc<dyn ServiceResolver>) -> Self {
        Self {
            local_delegate: Router::new(),
            service_resolver,
            cert_key: no_client_cert(),
            egress: EgressSelector::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tunnels: TunnelTracker::new(),
        }
    }

    pub fn with_local_delegate(mut self, router: Router) -> Self {
        self.local_delegate = router;
        self
    }

    pub fn with_cert_key(mut self, cert_key: Arc<dyn CertKeyContentProvider>) -> Self {
        self.cert_key = cert_key;
        self
    }

    pub fn with_egress(mut self, egress: EgressSelector) -> Self {
        self.egress = egress;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tunnels(mut self, tunnels: TunnelTracker) -> Self {
        self.tunnels = tunnels;
        self
    }
}
