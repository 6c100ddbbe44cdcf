//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! aggregator proxy. Every section has defaults so a minimal file works.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::apiservice::ApiService;

/// Root configuration for the aggregator proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    pub timeouts: TimeoutConfig,

    /// Client certificate presented to backends.
    pub client_cert: Option<ClientCertConfig>,

    pub egress: EgressConfig,

    /// How service references turn into backend addresses.
    pub resolver: ResolverConfig,

    pub authentication: AuthenticationConfig,

    /// API service registrations.
    pub api_services: Vec<ApiService>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on one proxied exchange, from resolution until the
    /// response (or the upgrade handshake) completes.
    pub proxy_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { proxy_request_secs: 60 }
    }
}

/// File-backed client certificate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientCertConfig {
    pub cert_path: String,
    pub key_path: String,

    /// How often the files are re-read.
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

fn default_reload_interval() -> u64 {
    60
}

/// Egress dialers per path. Only the `cluster` path is used for proxying.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EgressConfig {
    pub cluster: Option<EgressDialerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EgressDialerConfig {
    Direct,
    /// Tunnel through an HTTP proxy with `CONNECT`.
    HttpConnect { proxy_address: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolverMode {
    #[default]
    Static,
    ClusterDns,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResolverConfig {
    pub mode: ResolverMode,

    /// Appended to `<name>.<namespace>.svc` in cluster DNS mode.
    pub cluster_domain: Option<String>,

    /// Fixed endpoints for static mode.
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub namespace: String,
    pub name: String,
    /// `host:port` the service is reachable at.
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthenticationConfig {
    pub tokens: Vec<StaticTokenConfig>,
}

/// A bearer token and the identity it authenticates as.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticTokenConfig {
    pub token: String,
    pub user: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
