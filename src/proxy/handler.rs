//! Per-registration request dispatcher.

use arc_swap::ArcSwapOption;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

use crate::apiservice::ApiService;
use crate::net::connection::TunnelTracker;
use crate::net::egress::{EgressDialer, EgressType};
use crate::observability::metrics;
use crate::proxy::error::ProxyError;
use crate::proxy::handling::{build_handling_info, HandlingInfo, ProxyHandlingInfo};
use crate::proxy::request::new_request_for_proxy;
use crate::proxy::upgrade::{is_upgrade_request, spawn_relay};
use crate::proxy::ProxyOptions;
use crate::security::certs::CertKeyContentProvider;
use crate::security::headers::strip_hop_by_hop;
use crate::security::identity::RequestContext;
use crate::service::ServiceResolver;

/// Serves one group/version: either hands requests to the local delegate
/// or proxies them to the registered backend service.
///
/// The current [`HandlingInfo`] is swapped atomically on registration
/// updates; requests never take a lock to read it.
pub struct ProxyHandler {
    local_delegate: Router,
    service_resolver: Arc<dyn ServiceResolver>,
    cert_key: Arc<dyn CertKeyContentProvider>,
    egress_dialer: Option<Arc<dyn EgressDialer>>,
    request_timeout: Duration,
    tunnels: TunnelTracker,
    handling_info: ArcSwapOption<HandlingInfo>,
}

impl ProxyHandler {
    pub fn new(options: &ProxyOptions) -> Self {
        Self {
            local_delegate: options.local_delegate.clone(),
            service_resolver: options.service_resolver.clone(),
            cert_key: options.cert_key.clone(),
            egress_dialer: options.egress.lookup(EgressType::Cluster),
            request_timeout: options.request_timeout,
            tunnels: options.tunnels.clone(),
            handling_info: ArcSwapOption::empty(),
        }
    }

    /// Build a fresh snapshot from `api_service` and publish it.
    pub fn update_api_service(&self, api_service: &ApiService) {
        let info = build_handling_info(api_service, &self.cert_key, self.egress_dialer.clone());
        tracing::debug!(
            api_service = %api_service.name,
            available = api_service.is_available(),
            "Published handling info"
        );
        self.handling_info.store(Some(Arc::new(info)));
    }

    /// Drop the snapshot. Subsequent requests go to the local delegate.
    pub fn remove_api_service(&self) {
        self.handling_info.store(None);
    }

    pub fn handling_info(&self) -> Option<Arc<HandlingInfo>> {
        self.handling_info.load_full()
    }

    pub async fn serve(&self, req: Request<Body>) -> Response {
        let Some(snapshot) = self.handling_info.load_full() else {
            return self.delegate(req).await;
        };
        let info = match snapshot.as_ref() {
            HandlingInfo::Local => return self.delegate(req).await,
            HandlingInfo::Proxy(info) => info,
        };

        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = match self.proxy(info, req).await {
            Ok(response) => response,
            Err(e) => {
                if e.status() == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(api_service = %info.name, %method, %path, error = %e, "Proxy request failed");
                } else {
                    tracing::warn!(api_service = %info.name, %method, %path, error = %e, "Proxy request failed");
                }
                e.into_response()
            }
        };

        metrics::record_request(&info.name, response.status(), started.elapsed());
        response
    }

    async fn delegate(&self, req: Request<Body>) -> Response {
        match self.local_delegate.clone().oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    async fn proxy(&self, info: &ProxyHandlingInfo, mut req: Request<Body>) -> Result<Response, ProxyError> {
        if !info.available {
            return Err(ProxyError::ServiceUnavailable);
        }

        let ctx = req.extensions().get::<RequestContext>().cloned();
        let Some(ctx) = ctx.filter(|c| c.user().is_some()) else {
            return Err(ProxyError::MissingUser);
        };

        let location = self.resolve(info, &ctx).await?;
        let transport = info.transport.as_ref().map_err(|e| ProxyError::TransportBuild(e.clone()))?;

        let upgrade = is_upgrade_request(req.headers());
        let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut req));

        let (outbound, proxy_ctx) = new_request_for_proxy(&location, req, &ctx, self.request_timeout)?;
        let mut response = transport.round_trip(&location, outbound, proxy_ctx).await?;

        match client_upgrade {
            Some(client) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                let backend = hyper::upgrade::on(&mut response);
                let guard = self.tunnels.track();
                tracing::debug!(api_service = %info.name, tunnel_id = %guard.id(), "Relaying upgraded connection");
                spawn_relay(client, backend, guard);
            }
            _ => strip_hop_by_hop(response.headers_mut(), false),
        }

        Ok(response.map(Body::new))
    }

    /// Resolve the backend address, bounded by the same deadline and
    /// cancellation as the exchange itself.
    async fn resolve(&self, info: &ProxyHandlingInfo, ctx: &RequestContext) -> Result<url::Url, ProxyError> {
        let timeout = tokio::time::Instant::now() + self.request_timeout;
        let deadline = ctx.deadline().map_or(timeout, |d| d.min(timeout));

        tokio::select! {
            result = self.service_resolver.resolve_endpoint(
                &info.service_namespace,
                &info.service_name,
                info.service_port,
            ) => result.map_err(ProxyError::Resolve),
            _ = ctx.cancellation().cancelled() => Err(ProxyError::Canceled),
            _ = tokio::time::sleep_until(deadline) => Err(ProxyError::DeadlineExceeded),
        }
    }
}
