//! Inbound request preparation.
//!
//! # Responsibilities
//! - Generate the `Audit-ID` when the caller did not send one
//! - Authenticate the caller
//! - Attach a [`RequestContext`] for the proxy to read
//!
//! # Design Decisions
//! - Audit ID added as early as possible so every log line can carry it
//! - Group/version paths require credentials once tokens are configured;
//!   local paths such as `/healthz` stay anonymous
//! - Cancellation fires only when the request is abandoned, never after a
//!   response head has been produced (the body may still be streaming)

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::server::AppState;
use crate::routing::match_group_version;
use crate::security::headers::AUDIT_ID;
use crate::security::identity::RequestContext;

/// Generates UUID v4 audit IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeAuditId;

impl MakeRequestId for MakeAuditId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Authenticate the request and attach its [`RequestContext`].
pub async fn request_context(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let user = match state.authenticator.authenticate(req.headers()) {
        Ok(user) => user,
        Err(e) => {
            tracing::info!(error = %e, path = %req.uri().path(), "Authentication failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };
    if user.is_none() && state.require_authentication && match_group_version(req.uri().path()).is_some() {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let token = CancellationToken::new();
    let mut ctx = RequestContext::new()
        .with_scheme(state.scheme)
        .with_cancellation(token.clone());
    if let Some(user) = user {
        // Credentials are consumed here and never reach a backend.
        req.headers_mut().remove(header::AUTHORIZATION);
        ctx = ctx.with_user(user);
    }
    if let Some(audit_id) = req.headers().get(AUDIT_ID).and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_audit_id(audit_id);
    }
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        ctx = ctx.with_client_addr(addr.ip());
    }
    req.extensions_mut().insert(ctx);

    // Dropped unfired only if the client goes away before a response exists.
    let abandoned = token.drop_guard();
    let response = next.run(req).await;
    abandoned.disarm();
    response
}
