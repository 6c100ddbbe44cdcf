//! API service registrations.
//!
//! # Data Flow
//! ```text
//! registration source (config file, controller)
//!     → types.rs (ApiService: spec + status conditions)
//!     → routing::registry (one dispatcher per group/version)
//!     → proxy::handling (snapshot built from the registration)
//! ```
//!
//! # Design Decisions
//! - Registrations are read-only input; the proxy never mutates them
//! - Shape mirrors the cluster object (spec/status/conditions) so that
//!   controller output can be deserialized directly

pub mod types;

pub use types::{
    ApiService, ApiServiceCondition, ApiServiceConditionType, ApiServiceSpec, ApiServiceStatus,
    ConditionStatus, GroupVersion, ServiceReference,
};
