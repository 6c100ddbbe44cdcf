//! Registration types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A declaration that an API group/version is served by a backing service
/// rather than the local server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiService {
    /// Registration name, conventionally `<version>.<group>`.
    pub name: String,

    pub spec: ApiServiceSpec,

    #[serde(default)]
    pub status: ApiServiceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiServiceSpec {
    /// Backing service. `None` means the group/version is served locally.
    pub service: Option<ServiceReference>,

    pub group: String,

    pub version: String,

    /// Disables chain and hostname verification of the backend's serving
    /// certificate.
    pub insecure_skip_tls_verify: bool,

    /// PEM-encoded CA bundle used to validate the backend's serving certificate.
    pub ca_bundle: Option<String>,
}

/// Reference to the service that backs a registration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceReference {
    pub namespace: String,

    pub name: String,

    #[serde(default = "default_service_port")]
    pub port: u16,
}

fn default_service_port() -> u16 {
    443
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiServiceStatus {
    pub conditions: Vec<ApiServiceCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiServiceCondition {
    #[serde(rename = "type")]
    pub type_: ApiServiceConditionType,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ApiServiceConditionType {
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ApiService {
    /// Create a registration backed by `namespace/name:port`.
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
        service: Option<ServiceReference>,
    ) -> Self {
        Self {
            name: name.into(),
            spec: ApiServiceSpec {
                service,
                group: group.into(),
                version: version.into(),
                insecure_skip_tls_verify: false,
                ca_bundle: None,
            },
            status: ApiServiceStatus::default(),
        }
    }

    /// Returns true only when the `Available` condition is `True`.
    pub fn is_available(&self) -> bool {
        self.status
            .conditions
            .iter()
            .find(|c| c.type_ == ApiServiceConditionType::Available)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Set the `Available` condition, replacing any existing one.
    pub fn set_available(&mut self, available: bool) {
        let status = if available {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        self.status
            .conditions
            .retain(|c| c.type_ != ApiServiceConditionType::Available);
        self.status.conditions.push(ApiServiceCondition {
            type_: ApiServiceConditionType::Available,
            status,
            reason: None,
            message: None,
        });
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(&self.spec.group, &self.spec.version)
    }
}

impl ServiceReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            port,
        }
    }
}

/// An API group and version, e.g. `metrics.k8s.io/v1beta1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// The path prefix under which this group/version is served.
    pub fn path_prefix(&self) -> String {
        format!("/apis/{}/{}", self.group, self.version)
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.version)
    }
}
