//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check registrations are well formed and do not collide
//! - Validate value ranges (timeouts > 0, ports valid, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{EgressDialerConfig, ProxyConfig, ResolverMode};

/// One problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address {:?}", config.listener.bind_address),
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new("listener.tls", "cert_path and key_path are required"));
        }
    }

    if config.timeouts.proxy_request_secs == 0 {
        errors.push(ValidationError::new("timeouts.proxy_request_secs", "must be greater than 0"));
    }

    if let Some(client_cert) = &config.client_cert {
        if client_cert.cert_path.is_empty() || client_cert.key_path.is_empty() {
            errors.push(ValidationError::new("client_cert", "cert_path and key_path are required"));
        }
        if client_cert.reload_interval_secs == 0 {
            errors.push(ValidationError::new("client_cert.reload_interval_secs", "must be greater than 0"));
        }
    }

    if let Some(EgressDialerConfig::HttpConnect { proxy_address }) = &config.egress.cluster {
        if proxy_address.is_empty() {
            errors.push(ValidationError::new("egress.cluster.proxy_address", "must not be empty"));
        }
    }

    validate_resolver(config, &mut errors);
    validate_api_services(config, &mut errors);

    for (i, token) in config.authentication.tokens.iter().enumerate() {
        if token.token.is_empty() || token.user.is_empty() {
            errors.push(ValidationError::new(
                format!("authentication.tokens[{i}]"),
                "token and user must not be empty",
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_resolver(config: &ProxyConfig, errors: &mut Vec<ValidationError>) {
    if config.resolver.mode != ResolverMode::Static {
        return;
    }
    for (i, endpoint) in config.resolver.endpoints.iter().enumerate() {
        if endpoint.namespace.is_empty() || endpoint.name.is_empty() || endpoint.address.is_empty() {
            errors.push(ValidationError::new(
                format!("resolver.endpoints[{i}]"),
                "namespace, name and address must not be empty",
            ));
        }
    }
}

fn validate_api_services(config: &ProxyConfig, errors: &mut Vec<ValidationError>) {
    let mut names = HashSet::new();
    let mut group_versions = HashSet::new();

    for (i, svc) in config.api_services.iter().enumerate() {
        let field = |name: &str| format!("api_services[{i}].{name}");

        if svc.name.is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !names.insert(svc.name.as_str()) {
            errors.push(ValidationError::new(field("name"), format!("duplicate name {:?}", svc.name)));
        }

        if svc.spec.group.is_empty() {
            errors.push(ValidationError::new(field("spec.group"), "must not be empty"));
        }
        if svc.spec.version.is_empty() {
            errors.push(ValidationError::new(field("spec.version"), "must not be empty"));
        }
        let gv = svc.group_version();
        if !svc.spec.group.is_empty() && !svc.spec.version.is_empty() && !group_versions.insert(gv.clone()) {
            errors.push(ValidationError::new(field("spec"), format!("{gv} is already registered")));
        }

        let has_ca_bundle = svc.spec.ca_bundle.as_deref().is_some_and(|b| !b.trim().is_empty());
        if svc.spec.insecure_skip_tls_verify && has_ca_bundle {
            errors.push(ValidationError::new(
                field("spec"),
                "insecure_skip_tls_verify and ca_bundle are mutually exclusive",
            ));
        }

        if let Some(service) = &svc.spec.service {
            if service.namespace.is_empty() {
                errors.push(ValidationError::new(field("spec.service.namespace"), "must not be empty"));
            }
            if service.name.is_empty() {
                errors.push(ValidationError::new(field("spec.service.name"), "must not be empty"));
            }
            if service.port == 0 {
                errors.push(ValidationError::new(field("spec.service.port"), "must not be 0"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiservice::{ApiService, ServiceReference};

    fn remote(name: &str, group: &str) -> ApiService {
        ApiService::new(
            name,
            group,
            "v1",
            Some(ServiceReference::new("test-ns", "test-service", 443)),
        )
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = ProxyConfig::default();
        config.timeouts.proxy_request_secs = 0;
        config.listener.bind_address = "not an address".into();

        let mut conflicting = remote("v1.foo", "foo");
        conflicting.spec.insecure_skip_tls_verify = true;
        conflicting.spec.ca_bundle = Some("-----BEGIN CERTIFICATE-----".into());
        config.api_services = vec![conflicting, remote("v1.foo", "foo"), remote("v1.bar", "")];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"timeouts.proxy_request_secs"));
        assert!(fields.contains(&"api_services[0].spec"));
        assert!(fields.contains(&"api_services[1].name"));
        assert!(fields.contains(&"api_services[1].spec"));
        assert!(fields.contains(&"api_services[2].spec.group"));
    }

    #[test]
    fn local_registration_needs_no_service() {
        let mut config = ProxyConfig::default();
        config.api_services = vec![ApiService::new("v1.local", "local", "v1", None)];
        assert!(validate_config(&config).is_ok());

        config.api_services[0].spec.service = Some(ServiceReference::new("", "svc", 0));
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
