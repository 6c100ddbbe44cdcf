//! Outbound request construction.
//!
//! Turns an inbound request into the request sent to the backend: target
//! URL, forwarding headers, auth-proxy identity headers, audit ID and a
//! bounded deadline.

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{Request, Uri};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use crate::proxy::error::ProxyError;
use crate::proxy::upgrade::is_upgrade_request;
use crate::security::headers::{self, Forwarded, AUDIT_ID};
use crate::security::identity::RequestContext;

/// Cancellation scope of one outbound exchange.
///
/// The exchange token is a child of the inbound request's token, so
/// cancelling the inbound request cancels the exchange. Dropping the
/// context cancels the exchange too, unless it was [`detach`]ed once a
/// response head arrived.
///
/// [`detach`]: ProxyContext::detach
#[derive(Debug)]
pub struct ProxyContext {
    inbound: CancellationToken,
    token: CancellationToken,
    deadline: Instant,
    guard: DropGuard,
}

impl ProxyContext {
    /// Child of `parent` that expires at the earlier of the parent's own
    /// deadline and `timeout` from now.
    pub fn derive(parent: &RequestContext, timeout: Duration) -> Self {
        let bounded = Instant::now() + timeout;
        let deadline = parent.deadline().map_or(bounded, |d| d.min(bounded));
        let inbound = parent.cancellation().clone();
        let token = inbound.child_token();
        let guard = token.clone().drop_guard();
        Self {
            inbound,
            token,
            deadline,
            guard,
        }
    }

    /// Bounds the wait for the response head only.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancelled when the inbound request goes away or the context is
    /// dropped before being detached.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The inbound request's own token. Only its cancellation counts as
    /// the caller giving up.
    pub(crate) fn inbound(&self) -> &CancellationToken {
        &self.inbound
    }

    /// Keep the exchange running after the context is gone: the response
    /// body or upgraded stream now owns the connection.
    pub(crate) fn detach(self) {
        self.guard.disarm();
    }
}

/// Build the backend request for `req`, which is consumed.
///
/// The caller owns the returned [`ProxyContext`] and must keep it alive for
/// as long as the exchange runs.
pub fn new_request_for_proxy(
    location: &Url,
    req: Request<Body>,
    ctx: &RequestContext,
    timeout: Duration,
) -> Result<(Request<Body>, ProxyContext), ProxyError> {
    let (mut parts, body) = req.into_parts();

    let upgrade = is_upgrade_request(&parts.headers);
    let inbound_host = parts
        .headers
        .get(header::HOST)
        .cloned()
        .or_else(|| parts.uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()));
    let inbound_path = parts.uri.path().to_string();

    let authority = location
        .host_str()
        .map(|host| match location.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
        .ok_or_else(|| ProxyError::InvalidLocation(location.to_string()))?;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    parts.uri = Uri::builder()
        .scheme(location.scheme())
        .authority(authority.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidLocation(e.to_string()))?;

    headers::strip_hop_by_hop(&mut parts.headers, upgrade);
    parts.headers.insert(
        header::HOST,
        HeaderValue::from_str(&authority).map_err(|_| ProxyError::InvalidLocation(authority.clone()))?,
    );
    headers::set_forwarded_headers(
        &mut parts.headers,
        &Forwarded {
            proto: ctx.scheme(),
            uri: &inbound_path,
            host: inbound_host,
            client: ctx.client_addr(),
        },
    )?;

    if let Some(user) = ctx.user() {
        headers::set_auth_proxy_headers(&mut parts.headers, user)?;
    }

    parts.headers.remove(AUDIT_ID);
    if let Some(audit_id) = ctx.audit_id() {
        let value = HeaderValue::from_str(audit_id)
            .map_err(|_| headers::InvalidHeader(AUDIT_ID.to_string()))?;
        parts.headers.insert(AUDIT_ID, value);
    }

    Ok((Request::from_parts(parts, body), ProxyContext::derive(ctx, timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::headers::{X_FORWARDED_FOR, X_FORWARDED_URI, X_REMOTE_GROUP, X_REMOTE_USER};
    use crate::security::identity::UserInfo;

    fn location() -> Url {
        Url::parse("https://10.0.0.7:8443").unwrap()
    }

    fn inbound() -> Request<Body> {
        Request::builder()
            .uri("/apis/foo/v1/bars?limit=5")
            .header(header::HOST, "aggregator.example")
            .header(X_REMOTE_USER, "spoofed")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new()
            .with_user(UserInfo::new("alice").with_groups(["one", "two"]))
            .with_client_addr("192.168.1.20".parse().unwrap())
    }

    #[tokio::test]
    async fn targets_location_and_sets_identity() {
        let (req, _ctx) = new_request_for_proxy(&location(), inbound(), &ctx(), Duration::from_secs(5)).unwrap();

        assert_eq!(req.uri(), "https://10.0.0.7:8443/apis/foo/v1/bars?limit=5");
        assert_eq!(req.headers()[header::HOST], "10.0.0.7:8443");
        assert_eq!(req.headers()[X_FORWARDED_URI], "/apis/foo/v1/bars");
        assert_eq!(req.headers()[X_FORWARDED_FOR], "192.168.1.20");

        let users: Vec<_> = req.headers().get_all(X_REMOTE_USER).iter().collect();
        assert_eq!(users, ["alice"]);
        let groups: Vec<_> = req.headers().get_all(X_REMOTE_GROUP).iter().collect();
        assert_eq!(groups, ["one", "two"]);
        assert!(req.headers().get(header::CONNECTION).is_none());
    }

    #[tokio::test]
    async fn audit_id_only_from_context() {
        let mut with_header = inbound();
        with_header
            .headers_mut()
            .insert(AUDIT_ID, HeaderValue::from_static("client-chosen"));
        let (req, _ctx) = new_request_for_proxy(&location(), with_header, &ctx(), Duration::from_secs(5)).unwrap();
        assert!(req.headers().get(AUDIT_ID).is_none());

        let ctx = ctx().with_audit_id("a1b2c3");
        let (req, _ctx) = new_request_for_proxy(&location(), inbound(), &ctx, Duration::from_secs(5)).unwrap();
        assert_eq!(req.headers()[AUDIT_ID], "a1b2c3");
    }

    #[tokio::test]
    async fn upgrade_headers_survive() {
        let req = Request::builder()
            .uri("/apis/foo/v1/watch")
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        let (req, _ctx) = new_request_for_proxy(&location(), req, &ctx(), Duration::from_secs(5)).unwrap();
        assert_eq!(req.headers()[header::UPGRADE], "websocket");
        assert_eq!(req.headers()[header::CONNECTION], "Upgrade");
    }

    #[test]
    fn deadline_is_bounded_by_parent() {
        let parent_deadline = Instant::now() + Duration::from_millis(100);
        let parent = ctx().with_deadline(parent_deadline);
        let proxy_ctx = ProxyContext::derive(&parent, Duration::from_secs(60));
        assert_eq!(proxy_ctx.deadline(), parent_deadline);

        let before = Instant::now();
        let proxy_ctx = ProxyContext::derive(&ctx(), Duration::from_millis(10));
        assert!(proxy_ctx.deadline() >= before + Duration::from_millis(10));
        assert!(proxy_ctx.deadline() < before + Duration::from_secs(1));
    }

    #[test]
    fn dropping_context_cancels_only_the_exchange() {
        let parent = ctx();
        let proxy_ctx = ProxyContext::derive(&parent, Duration::from_secs(60));
        let token = proxy_ctx.token().clone();
        drop(proxy_ctx);
        assert!(token.is_cancelled());
        assert!(!parent.cancellation().is_cancelled());

        let proxy_ctx = ProxyContext::derive(&parent, Duration::from_secs(60));
        parent.cancellation().cancel();
        assert!(proxy_ctx.token().is_cancelled());
        assert!(proxy_ctx.inbound().is_cancelled());
    }

    #[test]
    fn detached_context_keeps_exchange_alive() {
        let parent = ctx();
        let proxy_ctx = ProxyContext::derive(&parent, Duration::from_secs(60));
        let token = proxy_ctx.token().clone();
        proxy_ctx.detach();
        assert!(!token.is_cancelled());

        parent.cancellation().cancel();
        assert!(token.is_cancelled());
    }
}
