//! Egress dialing.
//!
//! # Responsibilities
//! - Define the dial hook capability used instead of direct TCP connects
//! - Select a dialer per egress path (`cluster`, `control-plane`, `etcd`)
//! - Provide direct and HTTP CONNECT tunnel dialers
//!
//! # Design Decisions
//! - Dialers return a boxed byte stream so tunnels and plain sockets are
//!   interchangeable
//! - A dialer is invoked exactly once per outbound connection attempt

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::schema::{EgressConfig, EgressDialerConfig};

/// A connected, bidirectional byte stream.
pub trait EgressStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> EgressStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn EgressStream>;

/// Substitutes for direct dialing of outbound connections.
#[async_trait]
pub trait EgressDialer: Send + Sync {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream>;
}

/// Named egress paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EgressType {
    ControlPlane,
    Etcd,
    Cluster,
}

impl fmt::Display for EgressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EgressType::ControlPlane => write!(f, "controlplane"),
            EgressType::Etcd => write!(f, "etcd"),
            EgressType::Cluster => write!(f, "cluster"),
        }
    }
}

/// Maps egress paths to dialers. Paths without a dialer connect directly.
#[derive(Clone, Default)]
pub struct EgressSelector {
    dialers: HashMap<EgressType, Arc<dyn EgressDialer>>,
}

impl EgressSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialer(mut self, egress: EgressType, dialer: Arc<dyn EgressDialer>) -> Self {
        self.dialers.insert(egress, dialer);
        self
    }

    pub fn from_config(config: &EgressConfig) -> Self {
        let mut selector = Self::new();
        if let Some(cluster) = &config.cluster {
            let dialer: Arc<dyn EgressDialer> = match cluster {
                EgressDialerConfig::Direct => Arc::new(DirectDialer),
                EgressDialerConfig::HttpConnect { proxy_address } => {
                    Arc::new(HttpConnectDialer::new(proxy_address.clone()))
                }
            };
            selector = selector.with_dialer(EgressType::Cluster, dialer);
        }
        selector
    }

    pub fn lookup(&self, egress: EgressType) -> Option<Arc<dyn EgressDialer>> {
        self.dialers.get(&egress).cloned()
    }
}

impl fmt::Debug for EgressSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressSelector")
            .field("paths", &self.dialers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Plain TCP connect.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialer;

#[async_trait]
impl EgressDialer for DirectDialer {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        check_network(network)?;
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Tunnels each connection through an HTTP proxy using `CONNECT`.
#[derive(Debug, Clone)]
pub struct HttpConnectDialer {
    proxy_address: String,
}

/// Upper bound on the proxy's CONNECT response head.
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

impl HttpConnectDialer {
    pub fn new(proxy_address: impl Into<String>) -> Self {
        Self {
            proxy_address: proxy_address.into(),
        }
    }
}

#[async_trait]
impl EgressDialer for HttpConnectDialer {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedStream> {
        check_network(network)?;
        let mut stream = TcpStream::connect(&self.proxy_address).await?;
        stream.set_nodelay(true)?;

        let request = format!("CONNECT {address} HTTP/1.1\r\nHost: {address}\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;

        // Read byte-wise so nothing past the response head is consumed.
        let mut head = Vec::with_capacity(256);
        while !head.ends_with(b"\r\n\r\n") {
            if head.len() >= MAX_CONNECT_RESPONSE {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "CONNECT response too large"));
            }
            let byte = stream.read_u8().await?;
            head.push(byte);
        }

        let status_line = head
            .split(|b| *b == b'\n')
            .next()
            .map(|l| String::from_utf8_lossy(l).trim().to_string())
            .unwrap_or_default();
        let status = status_line.split_whitespace().nth(1).unwrap_or_default();
        if status != "200" {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("egress proxy refused CONNECT to {address}: {status_line}"),
            ));
        }

        tracing::debug!(proxy = %self.proxy_address, target = %address, "CONNECT tunnel established");
        Ok(Box::new(stream))
    }
}

fn check_network(network: &str) -> io::Result<()> {
    match network {
        "tcp" | "tcp4" | "tcp6" => Ok(()),
        other => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported network {other:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_dialer_tunnels_bytes() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut client, _) = proxy.accept().await.unwrap();
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                head.push(client.read_u8().await.unwrap());
            }
            let head = String::from_utf8(head).unwrap();
            let dest = head.split_whitespace().nth(1).unwrap().to_string();
            let mut upstream = TcpStream::connect(dest).await.unwrap();
            client.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await.unwrap();
            let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
        });

        let dialer = HttpConnectDialer::new(proxy_addr.to_string());
        let mut stream = dialer.dial("tcp", &target_addr.to_string()).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn connect_dialer_surfaces_refusal() {
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut client, _) = proxy.accept().await.unwrap();
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                head.push(client.read_u8().await.unwrap());
            }
            client.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        });

        let dialer = HttpConnectDialer::new(proxy_addr.to_string());
        let err = dialer.dial("tcp", "10.0.0.1:443").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn selector_only_knows_configured_paths() {
        let selector = EgressSelector::from_config(&EgressConfig {
            cluster: Some(EgressDialerConfig::Direct),
        });
        assert!(selector.lookup(EgressType::Cluster).is_some());
        assert!(selector.lookup(EgressType::Etcd).is_none());

        let err = DirectDialer.dial("udp", "127.0.0.1:1").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
