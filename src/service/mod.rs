//! Endpoint resolution.
//!
//! # Data Flow
//! ```text
//! (namespace, name, port) from the handling snapshot
//!     → resolver.rs (static table or cluster DNS name)
//!     → https URL of the backend, or a ResolveError
//! ```
//!
//! # Design Decisions
//! - Resolution failure is an ordinary outcome, surfaced as 503 by the caller
//! - Resolvers are capabilities so tests substitute them without mocks

pub mod resolver;

pub use resolver::{ClusterDnsResolver, ResolveError, ServiceResolver, StaticResolver};
