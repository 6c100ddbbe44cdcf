//! Proxy error taxonomy and its mapping to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::proxy::handling::TransportBuildError;
use crate::security::headers::InvalidHeader;
use crate::service::ResolveError;

/// Every way a proxied request can fail.
///
/// All variants render a response; none propagates past the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The registration's availability condition is false.
    #[error("service unavailable")]
    ServiceUnavailable,

    /// Upstream authentication did not attach an identity.
    #[error("missing user")]
    MissingUser,

    #[error("failed to resolve endpoint: {0}")]
    Resolve(#[source] ResolveError),

    /// Deferred failure from building the snapshot's transport.
    #[error("failed to build transport: {0}")]
    TransportBuild(#[source] TransportBuildError),

    #[error("invalid proxy location: {0}")]
    InvalidLocation(String),

    #[error(transparent)]
    InvalidHeader(#[from] InvalidHeader),

    #[error("dial tcp {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls handshake with {address}: {source}")]
    Tls {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Upstream(#[from] hyper::Error),

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context canceled")]
    Canceled,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingUser | ProxyError::InvalidHeader(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the failure happened while talking to the backend.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::Dial { .. }
                | ProxyError::Tls { .. }
                | ProxyError::Upstream(_)
                | ProxyError::DeadlineExceeded
                | ProxyError::Canceled
        )
    }

    fn body(&self) -> String {
        match self {
            ProxyError::MissingUser => "missing user".to_string(),
            ProxyError::InvalidHeader(_) => "Internal Server Error".to_string(),
            e if e.is_transport_failure() => format!("Error trying to reach service: '{}'", e),
            _ => "service unavailable".to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.body()).into_response()
    }
}
