//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → authn.rs (bearer token → UserInfo, or none)
//!     → identity.rs (RequestContext attached as request extension)
//!     → proxy dispatcher reads the user from the context
//!
//! Outbound request:
//!     → headers.rs (strip spoofable headers, add X-Remote-*, X-Forwarded-*)
//!     → certs.rs (client certificate presented on each TLS handshake)
//! ```
//!
//! # Design Decisions
//! - No trust in client input: identity headers are always rewritten
//! - Credentials are read live on every handshake, never snapshotted

pub mod authn;
pub mod certs;
pub mod headers;
pub mod identity;

pub use authn::{AuthError, Authenticator, StaticTokenAuthenticator};
pub use certs::{no_client_cert, CertKeyContentProvider, FileCertKeyContent};
pub use identity::{RequestContext, UserInfo};
