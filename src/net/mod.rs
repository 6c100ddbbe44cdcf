//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound connection attempt
//!     → egress.rs (dial hook for the cluster path, or direct TCP)
//!     → tls.rs (trust policy, live client certificate, handshake)
//!     → Hand off to the proxy transport
//!
//! Upgrade tunnels:
//!     Handshake relayed → connection.rs (tracked) → Closed
//! ```
//!
//! # Design Decisions
//! - Dial hooks are capabilities, substitutable in tests
//! - TLS material is parsed on demand, never cached across handshakes
//! - Each tunnel is tracked so leaks show up in counts and metrics

pub mod connection;
pub mod egress;
pub mod tls;
