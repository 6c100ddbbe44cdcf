//! Service endpoint resolvers.

use async_trait::async_trait;
use std::collections::HashMap;
use url::Url;

use crate::config::schema::{ResolverConfig, ResolverMode};

/// Error type for endpoint resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("service {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("invalid endpoint for {namespace}/{name}: {reason}")]
    InvalidEndpoint {
        namespace: String,
        name: String,
        reason: String,
    },
    #[error("{0}")]
    Other(String),
}

/// Maps a service reference to the URL the proxy should connect to.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn resolve_endpoint(&self, namespace: &str, name: &str, port: u16) -> Result<Url, ResolveError>;
}

/// Build the resolver described by configuration.
pub fn from_config(config: &ResolverConfig) -> std::sync::Arc<dyn ServiceResolver> {
    match config.mode {
        ResolverMode::Static => std::sync::Arc::new(StaticResolver::from_config(config)),
        ResolverMode::ClusterDns => std::sync::Arc::new(ClusterDnsResolver::new(config.cluster_domain.clone())),
    }
}

/// Resolves from a fixed `namespace/name` → `host:port` table.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    endpoints: HashMap<(String, String), String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        self.endpoints
            .insert((namespace.into(), name.into()), address.into());
        self
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        config.endpoints.iter().fold(Self::new(), |r, e| {
            r.with_endpoint(&e.namespace, &e.name, &e.address)
        })
    }
}

#[async_trait]
impl ServiceResolver for StaticResolver {
    async fn resolve_endpoint(&self, namespace: &str, name: &str, _port: u16) -> Result<Url, ResolveError> {
        let address = self
            .endpoints
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ResolveError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        https_url(namespace, name, address)
    }
}

/// Resolves to the service's cluster DNS name, `<name>.<namespace>.svc`.
#[derive(Debug, Clone, Default)]
pub struct ClusterDnsResolver {
    cluster_domain: Option<String>,
}

impl ClusterDnsResolver {
    pub fn new(cluster_domain: Option<String>) -> Self {
        Self {
            cluster_domain: cluster_domain.filter(|d| !d.is_empty()),
        }
    }
}

#[async_trait]
impl ServiceResolver for ClusterDnsResolver {
    async fn resolve_endpoint(&self, namespace: &str, name: &str, port: u16) -> Result<Url, ResolveError> {
        if namespace.is_empty() || name.is_empty() {
            return Err(ResolveError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        let host = match &self.cluster_domain {
            Some(domain) => format!("{name}.{namespace}.svc.{domain}"),
            None => format!("{name}.{namespace}.svc"),
        };
        https_url(namespace, name, &format!("{host}:{port}"))
    }
}

fn https_url(namespace: &str, name: &str, address: &str) -> Result<Url, ResolveError> {
    Url::parse(&format!("https://{address}")).map_err(|e| ResolveError::InvalidEndpoint {
        namespace: namespace.to_string(),
        name: name.to_string(),
        reason: e.to_string(),
    })
}
