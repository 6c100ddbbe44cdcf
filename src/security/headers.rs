//! Forwarding and auth-proxy headers.
//!
//! # Responsibilities
//! - Strip client-supplied identity headers so they cannot be spoofed
//! - Inject `X-Remote-User`, `X-Remote-Group`, `X-Remote-Extra-*`
//! - Inject `X-Forwarded-{Proto,Uri,Host,For}`
//! - Drop hop-by-hop headers before forwarding

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

use crate::security::identity::UserInfo;

pub const X_REMOTE_USER: HeaderName = HeaderName::from_static("x-remote-user");
pub const X_REMOTE_GROUP: HeaderName = HeaderName::from_static("x-remote-group");
pub const X_REMOTE_EXTRA_PREFIX: &str = "x-remote-extra-";
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_URI: HeaderName = HeaderName::from_static("x-forwarded-uri");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const AUDIT_ID: HeaderName = HeaderName::from_static("audit-id");

static HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
];

/// A header value that cannot be represented on the wire.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for header {0}")]
pub struct InvalidHeader(pub String);

/// Values for the `X-Forwarded-*` family.
#[derive(Debug, Clone)]
pub struct Forwarded<'a> {
    pub proto: &'a str,
    pub uri: &'a str,
    pub host: Option<HeaderValue>,
    pub client: Option<IpAddr>,
}

/// Replace any auth-proxy headers with ones describing `user`.
pub fn set_auth_proxy_headers(headers: &mut HeaderMap, user: &UserInfo) -> Result<(), InvalidHeader> {
    remove_auth_proxy_headers(headers);

    headers.insert(X_REMOTE_USER, header_value(X_REMOTE_USER.as_str(), &user.name)?);
    for group in &user.groups {
        headers.append(X_REMOTE_GROUP, header_value(X_REMOTE_GROUP.as_str(), group)?);
    }
    for (key, values) in &user.extra {
        let name = format!("{}{}", X_REMOTE_EXTRA_PREFIX, escape_extra_key(key));
        let name = HeaderName::try_from(name.as_str()).map_err(|_| InvalidHeader(name.clone()))?;
        for value in values {
            headers.append(name.clone(), header_value(name.as_str(), value)?);
        }
    }
    Ok(())
}

fn remove_auth_proxy_headers(headers: &mut HeaderMap) {
    headers.remove(X_REMOTE_USER);
    headers.remove(X_REMOTE_GROUP);
    let extras: Vec<HeaderName> = headers
        .keys()
        .filter(|k| k.as_str().starts_with(X_REMOTE_EXTRA_PREFIX))
        .cloned()
        .collect();
    for name in extras {
        headers.remove(name);
    }
}

/// Set the `X-Forwarded-*` headers. `X-Forwarded-For` is appended to any
/// value already present; the others are replaced.
pub fn set_forwarded_headers(headers: &mut HeaderMap, fwd: &Forwarded<'_>) -> Result<(), InvalidHeader> {
    headers.insert(X_FORWARDED_PROTO, header_value(X_FORWARDED_PROTO.as_str(), fwd.proto)?);
    headers.insert(X_FORWARDED_URI, header_value(X_FORWARDED_URI.as_str(), fwd.uri)?);

    match &fwd.host {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }

    let prior: Vec<String> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    headers.remove(X_FORWARDED_FOR);

    let mut chain = prior.join(", ");
    if let Some(client) = fwd.client {
        if !chain.is_empty() {
            chain.push_str(", ");
        }
        chain.push_str(&client.to_string());
    }
    if !chain.is_empty() {
        headers.insert(X_FORWARDED_FOR, header_value(X_FORWARDED_FOR.as_str(), &chain)?);
    }
    Ok(())
}

/// Remove hop-by-hop headers. When `upgrade` is set, `Connection` and
/// `Upgrade` survive so the handshake can be replayed upstream.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, upgrade: bool) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().chain(listed.iter()) {
        if upgrade && (name == header::CONNECTION || name == header::UPGRADE) {
            continue;
        }
        headers.remove(name);
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, InvalidHeader> {
    HeaderValue::from_str(value).map_err(|_| InvalidHeader(name.to_string()))
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn escape_extra_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
