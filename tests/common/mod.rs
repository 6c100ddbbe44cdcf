//! Shared utilities for integration testing: TLS backends, a WebSocket echo
//! backend, egress dialers and request helpers.

#![allow(dead_code)]

use aggregator_proxy::apiservice::{ApiService, ServiceReference};
use aggregator_proxy::net::egress::{BoxedStream, DirectDialer, EgressDialer};
use aggregator_proxy::net::tls::{crypto_provider, parse_cert_key, root_store_from_pem};
use aggregator_proxy::security::headers::AUDIT_ID;
use aggregator_proxy::security::identity::{RequestContext, UserInfo};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, Response};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures_util::{SinkExt, StreamExt};
use rustls::server::WebPkiClientVerifier;
use rustls::ServerConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request as WsRequest, Response as WsResponse};
use tokio_tungstenite::tungstenite::Message;

pub const SERVER_CA: &str = include_str!("../testdata/server-ca.pem");
pub const SERVER_CERT: &[u8] = include_bytes!("../testdata/server.pem");
pub const SERVER_KEY: &[u8] = include_bytes!("../testdata/server-key.pem");
pub const CLIENT_CA: &str = include_str!("../testdata/client-ca.pem");
pub const CLIENT_CERT: &[u8] = include_bytes!("../testdata/client.pem");
pub const CLIENT_KEY: &[u8] = include_bytes!("../testdata/client-key.pem");

pub const NAMESPACE: &str = "test-ns";
pub const SERVICE: &str = "test-service";

/// Serving configuration for a backend presenting the
/// `test-service.test-ns.svc` certificate. With `require_client_cert`, the
/// handshake fails unless the client presents a cert signed by the client CA.
pub fn server_tls_config(require_client_cert: bool) -> Arc<ServerConfig> {
    let provider = crypto_provider();
    let (chain, key) = parse_cert_key(SERVER_CERT, SERVER_KEY).unwrap();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();
    let builder = if require_client_cert {
        let roots = Arc::new(root_store_from_pem(CLIENT_CA.as_bytes()).unwrap());
        let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider)
            .build()
            .unwrap();
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };
    let mut config = builder.with_single_cert(chain, key).unwrap();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

/// A request as the backend saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
}

/// A TLS backend that records every request and answers with its path.
/// `/apis/foo/v1/hang` never answers. `/apis/foo/v1/stream` sends
/// [`STREAM_CHUNKS`] chunks, one every [`STREAM_INTERVAL`].
pub struct TlsBackend {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TlsBackend {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

pub const STREAM_CHUNKS: usize = 6;
pub const STREAM_INTERVAL: Duration = Duration::from_millis(200);

pub async fn start_tls_backend(require_client_cert: bool) -> TlsBackend {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorder = requests.clone();

    let app = Router::new()
        .route(
            "/apis/foo/v1/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                "too late"
            }),
        )
        .route(
            "/apis/foo/v1/stream",
            get(|| async {
                let chunks = futures_util::stream::iter(0..STREAM_CHUNKS).then(|i| async move {
                    tokio::time::sleep(STREAM_INTERVAL).await;
                    Ok::<_, io::Error>(format!("chunk-{i}\n"))
                });
                Body::from_stream(chunks)
            }),
        )
        .fallback(move |req: Request<Body>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(Recorded {
                    method: req.method().to_string(),
                    uri: req.uri().to_string(),
                    headers: req.headers().clone(),
                });
                format!("backend:{}", req.uri().path())
            }
        });

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let tls = RustlsConfig::from_config(server_tls_config(require_client_cert));

    tokio::spawn(async move {
        let _ = axum_server::from_tcp_rustls(listener, tls)
            .serve(app.into_make_service())
            .await;
    });

    TlsBackend { addr, requests }
}

/// A TLS WebSocket backend. Text messages come back prefixed with
/// `"hello "`, binary messages unchanged.
pub struct WsBackend {
    pub addr: SocketAddr,
    /// Handshake headers, lowercase name → value.
    pub handshakes: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    pub connections: Arc<AtomicUsize>,
}

impl WsBackend {
    pub fn handshake_header(&self, index: usize, name: &str) -> Vec<String> {
        self.handshakes.lock().unwrap()[index]
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

pub async fn start_ws_backend() -> WsBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(server_tls_config(false));
    let handshakes = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));

    let (recorder, counter) = (handshakes.clone(), connections.clone());
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let recorder = recorder.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(socket).await else {
                    return;
                };
                let callback = |req: &WsRequest, resp: WsResponse| -> Result<WsResponse, ErrorResponse> {
                    let headers = req
                        .headers()
                        .iter()
                        .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
                        .collect();
                    recorder.lock().unwrap().push(headers);
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tls, callback).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let reply = match msg {
                        Message::Text(text) => Message::text(format!("hello {}", text.as_str())),
                        Message::Binary(data) => Message::Binary(data),
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    if ws.send(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    WsBackend {
        addr,
        handshakes,
        connections,
    }
}

/// Dials directly, counting calls. A broken dialer fails every call.
#[derive(Debug, Default)]
pub struct CountingDialer {
    pub calls: AtomicUsize,
    pub broken: bool,
}

impl CountingDialer {
    pub fn broken() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            broken: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EgressDialer for CountingDialer {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "egress dialer is broken"));
        }
        DirectDialer.dial(network, address).await
    }
}

/// A plain HTTP `CONNECT` proxy. Returns its address and the number of
/// tunnels it has opened.
pub async fn start_connect_proxy() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let tunnels = Arc::new(AtomicUsize::new(0));

    let counter = tunnels.clone();
    tokio::spawn(async move {
        while let Ok((mut client, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                while !head.ends_with(b"\r\n\r\n") {
                    let Ok(byte) = client.read_u8().await else {
                        return;
                    };
                    head.push(byte);
                }
                let head = String::from_utf8_lossy(&head).to_string();
                let Some(target) = head.split_whitespace().nth(1) else {
                    return;
                };
                let Ok(mut upstream) = TcpStream::connect(target).await else {
                    let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                if client
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .is_ok()
                {
                    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                }
            });
        }
    });

    (addr, tunnels)
}

/// A registration for `test-service` in `test-ns`.
pub fn api_service(ca_bundle: Option<&str>, insecure: bool, available: bool) -> ApiService {
    let mut svc = ApiService::new(
        "v1.foo",
        "foo",
        "v1",
        Some(ServiceReference::new(NAMESPACE, SERVICE, 443)),
    );
    svc.spec.ca_bundle = ca_bundle.map(str::to_string);
    svc.spec.insecure_skip_tls_verify = insecure;
    svc.set_available(available);
    svc
}

pub fn alice() -> UserInfo {
    UserInfo::new("alice").with_groups(["one", "two"])
}

/// An inbound request as upstream middleware would hand it over.
pub fn request_as(path: &str, user: Option<UserInfo>) -> Request<Body> {
    let mut ctx = RequestContext::new()
        .with_scheme("https")
        .with_audit_id("audit-123")
        .with_client_addr("192.168.10.1".parse().unwrap());
    if let Some(user) = user {
        ctx = ctx.with_user(user);
    }
    let mut req = Request::builder()
        .uri(path)
        .header("host", "aggregator.example")
        .header(AUDIT_ID, "audit-123")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ctx);
    req
}

pub async fn body_string(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
