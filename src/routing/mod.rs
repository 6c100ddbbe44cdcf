//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → matcher.rs (extract /apis/<group>/<version>)
//!     → registry.rs (group/version → ProxyHandler)
//!     → Return: handler, or the local delegate
//!
//! Registration changes:
//!     add / remove / sync
//!     → Copy the current map, apply the change
//!     → Swap the new map in atomically
//! ```
//!
//! # Design Decisions
//! - Lookups are lock-free reads of an immutable map
//! - Deterministic: same path always reaches the same handler
//! - Unmatched paths are never an error here, the local delegate decides

pub mod matcher;
pub mod registry;

pub use matcher::match_group_version;
pub use registry::ApiServiceRegistry;
