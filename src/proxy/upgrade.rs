//! Protocol upgrade relay (WebSocket, SPDY and friends).
//!
//! The handshake is forwarded like any other request. When the backend
//! answers `101 Switching Protocols`, both sides are upgraded and bytes are
//! copied in both directions until either side closes.

use axum::http::header::{self, HeaderMap};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::net::connection::TunnelGuard;

/// Whether the request asks to switch protocols.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// Relay bytes between the client and the backend once both upgrades
/// complete. The tunnel is released when the relay ends.
pub fn spawn_relay(client: OnUpgrade, backend: OnUpgrade, guard: TunnelGuard) {
    tokio::spawn(async move {
        let tunnel_id = guard.id();
        let (client, backend) = match tokio::try_join!(client, backend) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(tunnel_id = %tunnel_id, error = %e, "Upgrade failed");
                return;
            }
        };
        tracing::debug!(tunnel_id = %tunnel_id, "Tunnel established");

        let mut client = TokioIo::new(client);
        let mut backend = TokioIo::new(backend);
        match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
            Ok((to_backend, to_client)) => {
                tracing::debug!(tunnel_id = %tunnel_id, to_backend, to_client, "Tunnel finished");
            }
            Err(e) => {
                tracing::debug!(tunnel_id = %tunnel_id, error = %e, "Tunnel ended with error");
            }
        }
        drop(guard);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn detects_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(!is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade_request(&headers));

        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        assert!(!is_upgrade_request(&headers));
    }
}
