//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: request context, audit ID, tracing
//! - Serve plain HTTP or TLS (axum-server + rustls)
//! - Dispatch requests to the API service registry
//! - Apply registration changes from config reloads
//! - Stop accepting on shutdown

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware,
    response::Response,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::request::{request_context, MakeAuditId};
use crate::net::tls::load_tls_config;
use crate::proxy::ProxyOptions;
use crate::routing::ApiServiceRegistry;
use crate::security::authn::{Authenticator, StaticTokenAuthenticator};
use crate::security::headers::AUDIT_ID;

/// How long in-flight TLS connections get to finish after shutdown.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ApiServiceRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Reject anonymous requests to group/version paths.
    pub require_authentication: bool,
    /// Scheme requests arrive on, forwarded as `X-Forwarded-Proto`.
    pub scheme: &'static str,
}

/// HTTP server for the aggregator proxy.
pub struct HttpServer {
    router: Router,
    registry: Arc<ApiServiceRegistry>,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a server for `config`, proxying with `options`. The configured
    /// registrations are applied immediately and callers are authenticated
    /// with the configured static tokens.
    pub fn new(config: ProxyConfig, options: ProxyOptions) -> Self {
        let authenticator = StaticTokenAuthenticator::from_config(&config.authentication.tokens);
        let require_authentication = !authenticator.is_empty();
        Self::build(config, options, Arc::new(authenticator), require_authentication)
    }

    /// Like [`new`](Self::new), with an external authenticator. Anonymous
    /// requests are let through; the proxy rejects them as missing a user.
    pub fn with_authenticator(config: ProxyConfig, options: ProxyOptions, authenticator: Arc<dyn Authenticator>) -> Self {
        Self::build(config, options, authenticator, false)
    }

    fn build(
        config: ProxyConfig,
        options: ProxyOptions,
        authenticator: Arc<dyn Authenticator>,
        require_authentication: bool,
    ) -> Self {
        let registry = Arc::new(ApiServiceRegistry::new(options));
        registry.sync(&config.api_services);

        let state = AppState {
            registry: registry.clone(),
            authenticator,
            require_authentication,
            scheme: if config.listener.tls.is_some() { "https" } else { "http" },
        };
        Self {
            router: Self::build_router(state),
            registry,
            config,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(dispatch)
            .layer(middleware::from_fn_with_state(state.clone(), request_context))
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(AUDIT_ID))
            .layer(SetRequestIdLayer::new(AUDIT_ID, MakeAuditId))
            .layer(TraceLayer::new_for_http())
    }

    pub fn registry(&self) -> Arc<ApiServiceRegistry> {
        self.registry.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires. New configurations received on `config_updates`
    /// re-sync the registrations.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tokio::spawn(apply_config_updates(
            self.registry.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        match &self.config.listener.tls {
            Some(tls) => {
                let tls_config = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                tracing::info!(address = %addr, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                let shutdown_handle = handle.clone();
                let mut shutdown = shutdown;
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    shutdown_handle.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, tls_config)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                let mut shutdown = shutdown;
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("Shutdown signal received");
                    })
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    state.registry.dispatch(req).await
}

async fn apply_config_updates(
    registry: Arc<ApiServiceRegistry>,
    mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = config_updates.recv() => match update {
                Some(config) => {
                    registry.sync(&config.api_services);
                    tracing::info!(api_services = config.api_services.len(), "Applied API service registrations");
                }
                None => return,
            },
            _ = shutdown.recv() => return,
        }
    }
}

/// Routes served by this process itself rather than by a backend.
pub fn local_delegate() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/livez", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiservice::{ApiService, ServiceReference};
    use crate::config::schema::StaticTokenConfig;
    use crate::security::identity::RequestContext;
    use crate::service::StaticResolver;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn options() -> ProxyOptions {
        ProxyOptions::new(Arc::new(StaticResolver::new())).with_local_delegate(local_delegate())
    }

    fn config_with_token() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.authentication.tokens.push(StaticTokenConfig {
            token: "secret".into(),
            user: "alice".into(),
            uid: String::new(),
            groups: vec!["admins".into()],
            extra: Default::default(),
        });
        let mut svc = ApiService::new(
            "v1.foo",
            "foo",
            "v1",
            Some(ServiceReference::new("test-ns", "test-service", 443)),
        );
        svc.set_available(false);
        config.api_services.push(svc);
        config
    }

    #[tokio::test]
    async fn health_is_local_and_anonymous() {
        let server = HttpServer::new(config_with_token(), options());
        let resp = server
            .router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(AUDIT_ID));
    }

    #[tokio::test]
    async fn group_version_paths_need_credentials() {
        let server = HttpServer::new(config_with_token(), options());

        let resp = server
            .router
            .clone()
            .oneshot(Request::get("/apis/foo/v1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = server
            .router
            .oneshot(
                Request::get("/apis/foo/v1")
                    .header("authorization", "Bearer secret")
                    .header(AUDIT_ID, "caller-chosen")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // Registered but unavailable.
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers()[AUDIT_ID], "caller-chosen");
    }

    #[tokio::test]
    async fn context_carries_audit_id_and_user() {
        let seen = Router::new().route(
            "/healthz",
            get(|req: Request<Body>| async move {
                let ctx = req.extensions().get::<RequestContext>().cloned().unwrap();
                format!(
                    "{}|{}|{}",
                    ctx.user().map(|u| u.name.as_str()).unwrap_or("-"),
                    ctx.audit_id().unwrap_or("-"),
                    ctx.scheme()
                )
            }),
        );
        let server = HttpServer::new(
            config_with_token(),
            ProxyOptions::new(Arc::new(StaticResolver::new())).with_local_delegate(seen),
        );
        let resp = server
            .router
            .oneshot(
                Request::get("/healthz")
                    .header("authorization", "Bearer secret")
                    .header(AUDIT_ID, "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"alice|abc|http");
    }

    #[tokio::test]
    async fn config_updates_resync_registrations() {
        let registry = Arc::new(ApiServiceRegistry::new(options()));
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(apply_config_updates(registry.clone(), rx, shutdown_rx));

        tx.send(config_with_token()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.registered(), ["v1.foo"]);

        tx.send(ProxyConfig::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.registered().is_empty());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
